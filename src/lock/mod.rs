//! Single-instance process lock.
//!
//! The lock file holds the owner's pid on one line. Exclusivity comes from
//! `flock(2)` on that file when the filesystem supports it; the pid record
//! drives stale-lock recovery and preemption of a live owner.

pub mod process;

use std::{
    fs::{self, File},
    io::{self, Write},
    os::unix::{fs::MetadataExt, io::AsRawFd},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{Error, Result};

pub use process::{current_pid, pid_alive};

const FLOCK_RETRIES_AFTER_PREEMPT: usize = 20;
const OPEN_ATTEMPTS: usize = 5;
const FLOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Released,
}

/// What the lock file currently says about its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOwner {
    Pid(i32),
    /// File exists but does not contain a pid.
    Corrupt,
}

pub fn read_owner(path: &Path) -> Result<Option<LockOwner>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(
            content
                .trim()
                .parse::<i32>()
                .map(LockOwner::Pid)
                .unwrap_or(LockOwner::Corrupt),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(lock_io(path, err)),
    }
}

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    max_instances: usize,
    grace_period: Duration,
    state: LockState,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_instances: 1,
            grace_period: Duration::from_secs(3),
            state: LockState::Unlocked,
        }
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances.max(1);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock for the lifetime of the returned guard.
    ///
    /// The flock is taken on the existing file before its record is judged,
    /// and the file is never unlinked while flock is in use. A contended lock
    /// with a live owner is preempted only while the number of live
    /// instances stays below `max_instances`; otherwise the call fails with
    /// [`Error::AlreadyRunning`]. Any other contention is [`Error::LockHeld`].
    pub fn acquire(mut self) -> Result<LockGuard> {
        self.state = LockState::Acquiring;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| lock_io(parent, e))?;
            }
        }

        let me = current_pid();
        let mut preempted = false;
        for _ in 0..OPEN_ATTEMPTS {
            let file = self.open_record()?;
            let mut outcome = try_flock(&file).map_err(|e| lock_io(&self.path, e))?;
            if outcome == Flock::Contended && !preempted {
                self.preempt_holder(me)?;
                preempted = true;
                outcome = self.wait_for_flock(&file)?;
            }

            match outcome {
                Flock::Contended => return Err(self.held()),
                Flock::Unsupported(code) => {
                    warn!(
                        lock = %self.path.display(),
                        error = %io::Error::from_raw_os_error(code),
                        "flock unsupported; relying on pid record only"
                    );
                    drop(file);
                    self.reclaim_by_pid(me)?;
                    let file = self.open_record()?;
                    return self.publish(file, me);
                }
                Flock::Acquired => {
                    // A holder releasing concurrently unlinks the inode we
                    // just locked; start over on the current file.
                    if !self.still_linked(&file)? {
                        debug!(lock = %self.path.display(), "lock file replaced while locking; retrying");
                        continue;
                    }
                    self.note_leftover_record(me)?;
                    return self.publish(file, me);
                }
            }
        }
        Err(self.held())
    }

    fn open_record(&self) -> Result<File> {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| lock_io(&self.path, e))
    }

    fn publish(mut self, mut file: File, me: i32) -> Result<LockGuard> {
        file.set_len(0).map_err(|e| lock_io(&self.path, e))?;
        writeln!(file, "{me}").map_err(|e| lock_io(&self.path, e))?;
        file.sync_all().map_err(|e| lock_io(&self.path, e))?;

        self.state = LockState::Held;
        info!(lock = %self.path.display(), pid = me, "process lock acquired");

        Ok(LockGuard {
            path: self.path,
            file: Some(file),
            pid: me,
            state: LockState::Held,
        })
    }

    /// The flock is held by someone else. Terminate the recorded owner if
    /// allowed; a record that names no live foreign process means the holder
    /// is still publishing (or is us), so the lock counts as held.
    fn preempt_holder(&self, me: i32) -> Result<()> {
        let pid = match read_owner(&self.path)? {
            Some(LockOwner::Pid(pid)) if pid != me && pid_alive(pid) => pid,
            _ => return Err(self.held()),
        };
        self.check_instances(pid)?;
        self.preempt(pid)
    }

    fn wait_for_flock(&self, file: &File) -> Result<Flock> {
        for _ in 0..FLOCK_RETRIES_AFTER_PREEMPT {
            thread::sleep(FLOCK_RETRY_INTERVAL);
            match try_flock(file).map_err(|e| lock_io(&self.path, e))? {
                Flock::Contended => continue,
                other => return Ok(other),
            }
        }
        Ok(Flock::Contended)
    }

    fn check_instances(&self, pid: i32) -> Result<()> {
        let mut live = process::sibling_instances();
        if !live.contains(&pid) {
            live.push(pid);
        }
        if live.len() >= self.max_instances {
            warn!(pid, running = live.len(), max = self.max_instances, "max instances reached");
            return Err(Error::AlreadyRunning {
                pid,
                running: live.len(),
                max: self.max_instances,
            }
            .into());
        }
        Ok(())
    }

    fn still_linked(&self, file: &File) -> Result<bool> {
        let held = file.metadata().map_err(|e| lock_io(&self.path, e))?;
        match fs::metadata(&self.path) {
            Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(lock_io(&self.path, err)),
        }
    }

    /// We hold the flock, so whatever the record says is left over from an
    /// owner that died without cleaning up. It is overwritten in place.
    fn note_leftover_record(&self, me: i32) -> Result<()> {
        match read_owner(&self.path)? {
            Some(LockOwner::Corrupt) => {
                warn!(lock = %self.path.display(), "lock file did not hold a pid; reclaiming it");
            }
            Some(LockOwner::Pid(pid)) if pid != me => {
                warn!(lock = %self.path.display(), pid, "stale lock file found; reclaiming it");
            }
            _ => {}
        }
        Ok(())
    }

    /// Pid-only protocol for filesystems without flock.
    fn reclaim_by_pid(&self, me: i32) -> Result<()> {
        match read_owner(&self.path)? {
            None => {}
            Some(LockOwner::Corrupt) => {
                warn!(lock = %self.path.display(), "lock file does not hold a pid; removing it");
                self.remove_record()?;
            }
            Some(LockOwner::Pid(pid)) if pid == me => {}
            Some(LockOwner::Pid(pid)) if !pid_alive(pid) => {
                warn!(lock = %self.path.display(), pid, "stale lock file found; removing it");
                self.remove_record()?;
            }
            Some(LockOwner::Pid(pid)) => {
                self.check_instances(pid)?;
                self.preempt(pid)?;
                self.remove_record()?;
            }
        }
        Ok(())
    }

    fn held(&self) -> anyhow::Error {
        Error::LockHeld(self.path.display().to_string()).into()
    }

    fn preempt(&self, pid: i32) -> Result<()> {
        warn!(pid, "found active instance; terminating it");
        match process::send_signal(pid, libc::SIGTERM) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {
                info!(pid, "process already terminated");
                return Ok(());
            }
            Err(err) => return Err(lock_io(&self.path, err)),
        }

        thread::sleep(self.grace_period);

        if pid_alive(pid) {
            warn!(pid, "process did not terminate; sending SIGKILL");
            match process::send_signal(pid, libc::SIGKILL) {
                Ok(()) => {}
                Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {}
                Err(err) => return Err(lock_io(&self.path, err)),
            }
        }
        Ok(())
    }

    fn remove_record(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(lock_io(&self.path, err)),
        }
    }
}

/// Held lock. Dropping it removes the lock file and releases the flock.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
    pid: i32,
    state: LockState,
}

impl LockGuard {
    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.state != LockState::Held {
            return Ok(());
        }
        self.state = LockState::Released;

        // Only remove a record that still names us; a preempting instance
        // may already have written its own.
        let owned = matches!(read_owner(&self.path), Ok(Some(LockOwner::Pid(pid))) if pid == self.pid);
        let result = if owned {
            match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(lock_io(&self.path, err)),
            }
        } else {
            Ok(())
        };
        // Closing the descriptor drops the flock.
        self.file.take();
        info!(lock = %self.path.display(), "process lock released");
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            warn!(lock = %self.path.display(), error = %err, "failed to release process lock");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flock {
    Acquired,
    Contended,
    /// Filesystem without flock support (ENOLCK / EOPNOTSUPP).
    Unsupported(i32),
}

fn try_flock(file: &File) -> io::Result<Flock> {
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(Flock::Acquired);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Ok(Flock::Contended),
        Some(code) if code == libc::ENOLCK || code == libc::EOPNOTSUPP => {
            Ok(Flock::Unsupported(code))
        }
        _ => Err(err),
    }
}

fn lock_io(path: &Path, source: io::Error) -> anyhow::Error {
    Error::LockIo {
        path: path.display().to_string(),
        source,
    }
    .into()
}

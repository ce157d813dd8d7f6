//! Process liveness and signalling helpers (Linux `/proc` and `kill(2)`).

use std::{fs, io, path::Path};

pub fn current_pid() -> i32 {
    std::process::id() as i32
}

/// `kill(pid, 0)` probe. EPERM still means the process exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

pub fn send_signal(pid: i32, signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::kill(pid, signal) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Short name the kernel reports for a process (`/proc/<pid>/comm`).
pub fn process_name(pid: i32) -> Option<String> {
    fs::read_to_string(Path::new("/proc").join(pid.to_string()).join("comm"))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Pids of other live processes running the same executable as this one.
pub fn sibling_instances() -> Vec<i32> {
    let me = current_pid();
    let Some(name) = process_name(me) else {
        return Vec::new();
    };

    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<i32>().ok()))
        .filter(|pid| *pid != me)
        .filter(|pid| process_name(*pid).as_deref() == Some(name.as_str()))
        .collect()
}

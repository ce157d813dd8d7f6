//! Monitoring sink adapter.
//!
//! Observations are handed to an external script as
//! `<script> <metric_name> <value> <status>`. Delivery is fire-and-forget:
//! failures are logged and never reach the caller.

use std::{fmt, path::PathBuf, process::Command};

use tracing::{debug, error, info, warn};

use crate::config::MonitoringConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricStatus {
    Ok,
    Error,
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSink {
    script: Option<PathBuf>,
}

impl MetricsSink {
    pub fn disabled() -> Self {
        Self { script: None }
    }

    pub fn from_config(config: &MonitoringConfig) -> Self {
        if !config.enabled {
            debug!("monitoring disabled");
            return Self::disabled();
        }
        match &config.script {
            None => {
                warn!("monitoring enabled but no script configured; metrics disabled");
                Self::disabled()
            }
            Some(script) if !script.exists() => {
                error!(script = %script.display(), "monitoring script not found; metrics disabled");
                Self::disabled()
            }
            Some(script) => Self {
                script: Some(script.clone()),
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.script.is_some()
    }

    pub fn send(&self, name: &str, value: impl fmt::Display, status: MetricStatus) {
        let Some(script) = &self.script else {
            return;
        };
        let name = sanitize_metric_name(name);
        let value = value.to_string();

        match Command::new(script)
            .arg(&name)
            .arg(&value)
            .arg(status.to_string())
            .output()
        {
            Ok(output) if output.status.success() => {
                info!(metric = %name, value = %value, status = %status, "metric sent");
            }
            Ok(output) => {
                error!(
                    metric = %name,
                    code = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "monitoring script failed"
                );
            }
            Err(err) => {
                error!(metric = %name, script = %script.display(), error = %err, "cannot run monitoring script");
            }
        }
    }
}

pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

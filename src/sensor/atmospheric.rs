//! ==============================================================================
//! atmospheric.rs - bme280 + sgp40 board via driver subprocess
//! ==============================================================================
//!
//! purpose:
//!     the sensor boards are read by an external driver (python, adafruit libs)
//!     that prints one line per poll on stdout:
//!
//! ```text
//!         ts,temperature,humidity,pressure,altitude,voc_index
//!
//!     this adapter owns that process and forwards each valid line as-is.
//!     the node never parses the numbers; the leader does.
//! ```
//!
//! why subprocess?:
//!     the adafruit drivers handle i2c timing and sensor compensation; there
//!     is nothing to gain from reimplementing them in the node.
//!
//! process lifetime:
//!     - spawned with kill_on_drop, so a dropped adapter never leaks it
//!     - close() sends SIGINT, waits up to shutdown_timeout, then SIGKILL
//!
//! ==============================================================================

use super::SensorStreams;
use crate::domain::{Reading, SensorKind, ATMOSPHERIC_FIELDS};
use crate::error::SensorError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// pause after a read that returned nothing
pub const READ_BACKOFF: Duration = Duration::from_millis(100);

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const NAME: &str = "atmospheric";

pub struct AtmosphericSensor {
    executable: PathBuf,
    poll_frequency_secs: u64,
    shutdown_timeout: Duration,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    reader: Option<JoinHandle<()>>,
}

impl AtmosphericSensor {
    pub fn new(executable: impl Into<PathBuf>, poll_frequency_secs: u64) -> Self {
        Self {
            executable: executable.into(),
            poll_frequency_secs,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            child: None,
            stdout: None,
            reader: None,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// spawn the driver and capture its stdout
    pub fn init(&mut self) -> Result<(), SensorError> {
        let mut child = Command::new(&self.executable)
            .arg("--poll-frequency")
            .arg(self.poll_frequency_secs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SensorError::Init { sensor: NAME, source })?;

        self.stdout = child.stdout.take();
        tracing::debug!(
            executable = %self.executable.display(),
            pid = child.id(),
            "started atmospheric driver"
        );
        self.child = Some(child);
        Ok(())
    }

    pub fn data_stream(&mut self) -> Result<SensorStreams, SensorError> {
        let stdout = self.stdout.take().ok_or(SensorError::NotInitialized(NAME))?;
        let (readings_tx, errors_tx, streams) = SensorStreams::channel();

        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match lines.read_line(&mut line).await {
                    Ok(0) => tokio::time::sleep(READ_BACKOFF).await,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !is_valid_line(trimmed) {
                            tracing::debug!(line = trimmed, "discarding invalid atmospheric line");
                            continue;
                        }
                        let reading = Reading::new(SensorKind::Atmospheric, trimmed);
                        if readings_tx.send(reading).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if errors_tx.send(SensorError::Read(e)).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(READ_BACKOFF).await;
                    }
                }
            }
        }));

        Ok(streams)
    }

    /// interrupt the driver and wait for it, bounded by shutdown_timeout
    pub async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let Some(mut child) = self.child.take() else {
            return;
        };

        interrupt(&mut child);
        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::info!(%status, "atmospheric driver exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed waiting for atmospheric driver"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shutdown_timeout.as_secs_f32(),
                    "atmospheric driver ignored interrupt, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::error!(error = %e, "failed to kill atmospheric driver");
                }
            }
        }
    }
}

/// a usable line has exactly ATMOSPHERIC_FIELDS - 1 delimiters
pub fn is_valid_line(line: &str) -> bool {
    line.matches(',').count() == ATMOSPHERIC_FIELDS - 1
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    // id() is None once the child has been reaped
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned and have not reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_validation_counts_delimiters() {
        assert!(is_valid_line("1690000000,21.5,40,1013,120,88"));
        assert!(is_valid_line(",,,,,"));
        assert!(!is_valid_line("Temperature: 21.5 C"));
        assert!(!is_valid_line("1,2,3,4,5,6,7"));
        assert!(!is_valid_line(""));
    }

    #[tokio::test]
    async fn missing_executable_fails_init() {
        let mut sensor = AtmosphericSensor::new("/definitely/not/here/driver", 1);
        assert!(matches!(sensor.init(), Err(SensorError::Init { sensor: "atmospheric", .. })));
    }

    #[tokio::test]
    async fn stream_before_init_is_rejected() {
        let mut sensor = AtmosphericSensor::new("/bin/true", 1);
        assert!(matches!(sensor.data_stream(), Err(SensorError::NotInitialized(_))));
    }

    #[cfg(unix)]
    fn driver_script(body: &str) -> tempfile::TempPath {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let path = file.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_only_valid_lines() {
        let script = driver_script(
            "echo 'Temperature: 21.5 C'\n\
             echo '1690000000,21.5,40,1013,120,88'\n\
             exec sleep 30",
        );
        let mut sensor = AtmosphericSensor::new(script.to_path_buf(), 1);
        sensor.init().unwrap();
        let mut streams = sensor.data_stream().unwrap();

        let reading = tokio::time::timeout(Duration::from_secs(5), streams.readings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.kind, SensorKind::Atmospheric);
        assert_eq!(reading.raw, b"1690000000,21.5,40,1013,120,88".to_vec());

        tokio::time::timeout(Duration::from_secs(5), sensor.close()).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_kills_driver_that_ignores_interrupt() {
        let script = driver_script("trap '' INT\nwhile true; do sleep 1; done");
        let mut sensor = AtmosphericSensor::new(script.to_path_buf(), 1)
            .with_shutdown_timeout(Duration::from_millis(200));
        sensor.init().unwrap();
        let _streams = sensor.data_stream().unwrap();

        tokio::time::timeout(Duration::from_secs(5), sensor.close()).await.unwrap();
        assert!(sensor.child.is_none());
    }
}

//! Single-instance guard.
//!
//! Two controllers fighting over the same fans would undo each other every
//! tick, so startup claims a PID file and refuses to run while another live
//! process holds it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::tracing::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("Another instance is already running (PID {0})")]
    AlreadyRunning(i32),

    #[error("Failed to access PID file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Held for as long as the process should count as running. Dropping it
/// removes the file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current PID to `path`.
    ///
    /// A file naming a live process is an error. A file naming a dead
    /// process, or holding garbage, is stale and gets replaced.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, PidFileError> {
        let path = path.as_ref().to_owned();
        let io_err = |source| PidFileError::Io {
            path: path.clone(),
            source,
        };

        match fs::read_to_string(&path) {
            Ok(contents) => {
                if let Some(pid) = parse_pid(&contents) {
                    if is_alive(pid) {
                        return Err(PidFileError::AlreadyRunning(pid));
                    }
                }
                warn!(path = %path.display(), "Removing stale PID file");
                fs::remove_file(&path).map_err(io_err)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&path)
            .map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;

        debug!(path = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Signal 0 probes for existence without delivering anything. EPERM still
/// means the process exists, just under another user.
fn is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

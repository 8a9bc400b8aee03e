//! PID file for single-instance enforcement.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// A daemon PID file at a fixed path.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The PID file at the default location (`~/.skybot/daemon.pid`).
    pub fn default_location() -> Self {
        Self::new(skybot_types::config::daemon_pid_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current process id.
    pub fn write(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        let pid = std::process::id();
        std::fs::write(&self.path, pid.to_string())
            .map_err(|e| format!("failed to write PID file: {e}"))?;
        info!(pid, path = %self.path.display(), "PID file written");
        Ok(())
    }

    pub fn read(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, path = %self.path.display(), "PID file not removed");
        }
    }

    /// PID of another live daemon owning this file, if any.
    ///
    /// A file naming a dead process, or this process, does not count.
    pub fn running_pid(&self) -> Option<u32> {
        self.read()
            .filter(|pid| *pid != std::process::id() && is_process_alive(*pid))
    }
}

/// Whether a process with `pid` exists.
pub fn is_process_alive(pid: u32) -> bool {
    // Values above i32::MAX would address process groups.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("run").join("daemon.pid"));

        assert_eq!(pid_file.read(), None);
        pid_file.write().unwrap();
        assert_eq!(pid_file.read(), Some(std::process::id()));

        pid_file.remove();
        assert!(!pid_file.path().exists());
        pid_file.remove();
    }

    #[test]
    fn own_pid_is_not_another_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("daemon.pid"));
        pid_file.write().unwrap();
        assert_eq!(pid_file.running_pid(), None);
    }

    #[test]
    fn garbage_and_out_of_range_pids_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("daemon.pid"));
        std::fs::write(pid_file.path(), "not a pid").unwrap();
        assert_eq!(pid_file.read(), None);

        std::fs::write(pid_file.path(), u32::MAX.to_string()).unwrap();
        assert_eq!(pid_file.running_pid(), None);
        assert!(!is_process_alive(u32::MAX));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}

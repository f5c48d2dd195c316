//! PID-file based daemon supervision.
//!
//! The supervised daemons (`udhcpc`, `wpa_supplicant`) background themselves
//! and write their own PID file when asked to. Liveness is therefore defined
//! as "the PID file exists": the daemon removes it on clean exit. A crashed
//! daemon can leave a stale file behind, in which case stop escalation will
//! signal a dead PID and report the daemon as still running.
//!
//! Signals are delivered through the same command seam as everything else
//! (`kill -TERM <pid>`), so supervision is fully scriptable in tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{NetshellError, Result};
use crate::runner::CommandRunner;

/// Supervises one backgrounded daemon instance on one interface.
pub struct DaemonSupervisor {
    daemon: String,
    interface: String,
    pid_file: PathBuf,
    wait_timeout: Duration,
    poll_interval: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl DaemonSupervisor {
    pub fn new(
        daemon: &str,
        interface: &str,
        pid_file: PathBuf,
        wait_timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            daemon: daemon.to_string(),
            interface: interface.to_string(),
            pid_file,
            wait_timeout,
            poll_interval: Duration::from_millis(100),
            runner,
        }
    }

    pub fn with_pid_file(mut self, pid_file: PathBuf) -> Self {
        self.pid_file = pid_file;
        self
    }

    /// Window for PID file appearance after launch and disappearance after a
    /// signal.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Whether the daemon's PID file exists. Known limitation: a stale file
    /// from a crashed daemon reads as running.
    pub fn is_running(&self) -> bool {
        self.pid_file.exists()
    }

    /// PID recorded in the PID file.
    ///
    /// # Errors
    ///
    /// * `DaemonNotRunning` - no PID file
    /// * `ParseError` - PID file content is not a number
    pub fn pid(&self) -> Result<i32> {
        if !self.is_running() {
            return Err(self.not_running());
        }

        // The file can disappear between the existence check and the read if
        // the daemon exits on its own.
        let raw = fs::read_to_string(&self.pid_file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                self.not_running()
            } else {
                NetshellError::io_error(format!("reading {}", self.pid_file.display()), e)
            }
        })?;
        raw.trim()
            .parse()
            .map_err(|_| NetshellError::ParseError {
                what: format!("PID file {}", self.pid_file.display()),
                reason: format!("expected a PID, got {:?}", raw.trim()),
            })
    }

    /// Launch the daemon and wait for its PID file to appear.
    ///
    /// An already-running instance is stopped first; launch on top of a live
    /// daemon would orphan it. An instance that already exited on its own is
    /// not an error. Returns whether the PID file appeared within the window.
    ///
    /// # Errors
    ///
    /// * `DaemonStillRunning` - a previous instance survived stop escalation
    pub fn launch(&self, program: &str, args: &[&str]) -> Result<bool> {
        // The previous instance may exit on its own at any point, so "nothing
        // to stop" is a valid starting state rather than an error.
        match self.stop() {
            Ok(true) => {}
            Ok(false) => {
                return Err(NetshellError::DaemonStillRunning {
                    daemon: self.daemon.clone(),
                    interface: self.interface.clone(),
                })
            }
            Err(NetshellError::DaemonNotRunning { .. }) => {}
            Err(e) => return Err(e),
        }

        self.runner.run(program, args)?;

        let appeared = self.wait_for(|| self.is_running());
        if appeared {
            info!("{} started on {}", self.daemon, self.interface);
        } else {
            warn!(
                "{} did not write {} within {:?}",
                self.daemon,
                self.pid_file.display(),
                self.wait_timeout
            );
        }
        Ok(appeared)
    }

    /// Stop the daemon: SIGTERM, wait for the PID file to disappear, and on
    /// timeout escalate to SIGKILL exactly once.
    ///
    /// Returns whether the daemon is gone.
    ///
    /// # Errors
    ///
    /// * `DaemonNotRunning` - no PID file to signal
    pub fn stop(&self) -> Result<bool> {
        let pid = self.pid()?;
        self.signal(pid, "-TERM")?;

        if self.wait_for(|| !self.is_running()) {
            info!("{} on {} stopped", self.daemon, self.interface);
            return Ok(true);
        }

        warn!(
            "{} on {} ignored SIGTERM, escalating to SIGKILL",
            self.daemon, self.interface
        );
        self.terminate()
    }

    /// Forcibly kill the daemon and wait for the PID file to disappear.
    pub fn terminate(&self) -> Result<bool> {
        let pid = self.pid()?;
        self.signal(pid, "-KILL")?;
        Ok(self.wait_for(|| !self.is_running()))
    }

    fn signal(&self, pid: i32, signal: &str) -> Result<()> {
        debug!("signalling {} (pid {}) with {}", self.daemon, pid, signal);
        self.runner.run("kill", &[signal, &pid.to_string()])?;
        Ok(())
    }

    fn wait_for(&self, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn not_running(&self) -> NetshellError {
        NetshellError::DaemonNotRunning {
            daemon: self.daemon.clone(),
            interface: self.interface.clone(),
            pid_file: self.pid_file.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;

    fn supervisor(pid_file: PathBuf, runner: Arc<FakeRunner>) -> DaemonSupervisor {
        DaemonSupervisor::new(
            "testd",
            "eth0",
            pid_file,
            Duration::from_millis(20),
            runner as Arc<dyn CommandRunner>,
        )
        .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn liveness_follows_the_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");
        let sup = supervisor(pid_file.clone(), Arc::new(FakeRunner::new()));

        assert!(!sup.is_running());
        assert!(matches!(
            sup.pid(),
            Err(NetshellError::DaemonNotRunning { .. })
        ));

        fs::write(&pid_file, "1234\n").unwrap();
        assert!(sup.is_running());
        assert_eq!(sup.pid().unwrap(), 1234);
    }

    #[test]
    fn garbage_in_the_pid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");
        fs::write(&pid_file, "not-a-pid\n").unwrap();

        let sup = supervisor(pid_file, Arc::new(FakeRunner::new()));
        assert!(matches!(sup.pid(), Err(NetshellError::ParseError { .. })));
    }

    #[test]
    fn launch_reports_success_when_the_pid_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");
        let runner = Arc::new(FakeRunner::new());
        {
            let pid_file = pid_file.clone();
            runner.on_command("testd", move |_| {
                fs::write(&pid_file, "4321\n").unwrap();
            });
        }

        let sup = supervisor(pid_file, Arc::clone(&runner));
        assert!(sup.launch("testd", &["-b"]).unwrap());
        assert_eq!(runner.calls()[0], ("testd".to_string(), vec!["-b".to_string()]));
    }

    #[test]
    fn launch_reports_failure_when_the_pid_file_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path().join("testd.pid"), Arc::new(FakeRunner::new()));
        assert!(!sup.launch("testd", &[]).unwrap());
    }

    #[test]
    fn stop_sends_sigterm_and_succeeds_when_the_daemon_exits() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");
        fs::write(&pid_file, "77\n").unwrap();

        let runner = Arc::new(FakeRunner::new());
        {
            let pid_file = pid_file.clone();
            runner.on_command("kill", move |_| {
                let _ = fs::remove_file(&pid_file);
            });
        }

        let sup = supervisor(pid_file, Arc::clone(&runner));
        assert!(sup.stop().unwrap());
        assert_eq!(runner.calls(), vec![(
            "kill".to_string(),
            vec!["-TERM".to_string(), "77".to_string()]
        )]);
    }

    #[test]
    fn stop_escalates_to_sigkill_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");
        fs::write(&pid_file, "77\n").unwrap();

        // No hook: the PID file never disappears.
        let runner = Arc::new(FakeRunner::new());
        let sup = supervisor(pid_file, Arc::clone(&runner));

        assert!(!sup.stop().unwrap());
        assert_eq!(runner.calls(), vec![
            ("kill".to_string(), vec!["-TERM".to_string(), "77".to_string()]),
            ("kill".to_string(), vec!["-KILL".to_string(), "77".to_string()]),
        ]);
    }

    #[test]
    fn launch_tolerates_a_daemon_that_already_exited() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");

        // No PID file: the pre-launch stop finds nothing to signal, which
        // must read as "already gone" rather than fail the relaunch.
        let runner = Arc::new(FakeRunner::new());
        {
            let pid_file = pid_file.clone();
            runner.on_command("testd", move |_| {
                fs::write(&pid_file, "58\n").unwrap();
            });
        }

        let sup = supervisor(pid_file, Arc::clone(&runner));
        assert!(sup.launch("testd", &[]).unwrap());
        assert_eq!(runner.count("kill"), 0);
    }

    #[test]
    fn relaunch_stops_the_previous_instance_first() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("testd.pid");
        fs::write(&pid_file, "55\n").unwrap();

        let runner = Arc::new(FakeRunner::new());
        {
            let pid_file = pid_file.clone();
            runner.on_command("kill", move |_| {
                let _ = fs::remove_file(&pid_file);
            });
        }
        {
            let pid_file = pid_file.clone();
            runner.on_command("testd", move |_| {
                fs::write(&pid_file, "56\n").unwrap();
            });
        }

        let sup = supervisor(pid_file, Arc::clone(&runner));
        assert!(sup.launch("testd", &[]).unwrap());
        assert_eq!(runner.count("kill"), 1);
        assert_eq!(sup.pid().unwrap(), 56);
    }
}

//! DHCP client lifecycle via `udhcpc`.
//!
//! Thin wrapper over [`DaemonSupervisor`]: one udhcpc instance per interface,
//! identified by a `DHCP_<interface>.pid` file. The startup window is short
//! on purpose: `-t 1` makes udhcpc try a single discover round, and callers
//! treat a slow lease as failure rather than blocking.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::daemon::DaemonSupervisor;
use crate::error::{NetshellError, Result};
use crate::link::InterfaceManager;
use crate::runner::{CommandRunner, SystemRunner};

const DEFAULT_PID_DIR: &str = "/var/run";
const STARTUP_WINDOW: Duration = Duration::from_secs(1);

/// DHCP client bound to one interface.
pub struct DhcpClient {
    interface: String,
    supervisor: DaemonSupervisor,
}

impl DhcpClient {
    /// # Errors
    ///
    /// * `InterfaceNotFound` - interface absent from the system snapshot
    pub fn new(interface: &str) -> Result<Self> {
        Self::with_runner(interface, Arc::new(SystemRunner))
    }

    pub fn with_runner(interface: &str, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let mut link = InterfaceManager::with_runner(Arc::clone(&runner));
        if !link.is_valid_interface(interface)? {
            return Err(NetshellError::InterfaceNotFound {
                name: interface.to_string(),
            });
        }

        let pid_file = Path::new(DEFAULT_PID_DIR).join(format!("DHCP_{}.pid", interface));
        Ok(Self {
            interface: interface.to_string(),
            supervisor: DaemonSupervisor::new(
                "udhcpc",
                interface,
                pid_file,
                STARTUP_WINDOW,
                runner,
            ),
        })
    }

    /// Directory for the PID file (default `/var/run`).
    pub fn with_pid_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let pid_file = dir
            .as_ref()
            .join(format!("DHCP_{}.pid", self.interface));
        self.supervisor = self.supervisor.with_pid_file(pid_file);
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.supervisor = self.supervisor.with_wait_timeout(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.supervisor = self.supervisor.with_poll_interval(interval);
        self
    }

    pub fn pid_file(&self) -> &Path {
        self.supervisor.pid_file()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn pid(&self) -> Result<i32> {
        self.supervisor.pid()
    }

    /// Launch udhcpc in the background and wait for its PID file.
    ///
    /// Returns whether the client came up within the startup window. A
    /// previously running instance is stopped first.
    pub fn start(&self) -> Result<bool> {
        let pid_file = self.supervisor.pid_file().display().to_string();
        self.supervisor.launch(
            "udhcpc",
            &["-b", "-t", "1", "-i", &self.interface, "-p", &pid_file],
        )
    }

    /// SIGTERM, then SIGKILL on timeout. Returns whether the client is gone.
    pub fn stop(&self) -> Result<bool> {
        self.supervisor.stop()
    }

    pub fn terminate(&self) -> Result<bool> {
        self.supervisor.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;

    const ETH0: &str = "\
eth0      Link encap:Ethernet  HWaddr 00:11:22:33:44:55
          UP BROADCAST RUNNING  MTU:1500
";

    fn client(runner: Arc<FakeRunner>, pid_dir: &Path) -> DhcpClient {
        runner.set_output("ifconfig", ETH0);
        DhcpClient::with_runner("eth0", runner as Arc<dyn CommandRunner>)
            .unwrap()
            .with_pid_dir(pid_dir)
            .with_startup_timeout(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn construction_rejects_unknown_interfaces() {
        let runner = Arc::new(FakeRunner::new());
        runner.set_output("ifconfig", ETH0);
        assert!(matches!(
            DhcpClient::with_runner("wlan9", runner as Arc<dyn CommandRunner>),
            Err(NetshellError::InterfaceNotFound { .. })
        ));
    }

    #[test]
    fn start_launches_udhcpc_with_interface_and_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let client = client(Arc::clone(&runner), dir.path());

        let pid_file = client.pid_file().to_path_buf();
        {
            let pid_file = pid_file.clone();
            runner.on_command("udhcpc", move |_| {
                std::fs::write(&pid_file, "999\n").unwrap();
            });
        }

        assert!(client.start().unwrap());
        assert!(client.is_running());
        assert_eq!(client.pid().unwrap(), 999);

        let calls = runner.calls();
        let launch = calls.iter().find(|(p, _)| p == "udhcpc").unwrap();
        assert_eq!(
            launch.1,
            vec![
                "-b",
                "-t",
                "1",
                "-i",
                "eth0",
                "-p",
                pid_file.to_str().unwrap()
            ]
        );
    }

    #[test]
    fn start_reports_failure_when_no_lease_materializes() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let client = client(runner, dir.path());
        // No hook: the PID file never appears inside the startup window.
        assert!(!client.start().unwrap());
    }

    #[test]
    fn stop_without_a_running_client_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let client = client(runner, dir.path());
        assert!(matches!(
            client.stop(),
            Err(NetshellError::DaemonNotRunning { .. })
        ));
    }
}

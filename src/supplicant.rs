//! `wpa_supplicant` lifecycle and config generation.
//!
//! Starting the supplicant for a network is a three-step affair: derive the
//! pre-shared key from the passphrase with `wpa_passphrase`, write a minimal
//! config file (`<config_dir>/WPA_<interface>`), then launch the daemon in
//! the background and wait for its PID file (`<pid_dir>/WPA_<interface>.pid`).
//! The plaintext passphrase never touches the filesystem; only the derived
//! key does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::daemon::DaemonSupervisor;
use crate::error::{NetshellError, Result};
use crate::runner::{CommandRunner, SystemRunner};
use crate::wireless::WirelessManager;

const DEFAULT_PID_DIR: &str = "/var/run";
const DEFAULT_CONFIG_DIR: &str = "/tmp";
const STARTUP_WINDOW: Duration = Duration::from_secs(5);

// The derived key is the 64-hex-digit psk line; the commented plaintext
// echo (`#psk="..."`) must not match.
static PSK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\tpsk=([0-9a-fA-F]{64})").unwrap());

/// Manages one wpa_supplicant instance on one wireless interface.
pub struct WpaSupplicant {
    interface: String,
    supervisor: DaemonSupervisor,
    config_file: PathBuf,
    ssid: Option<String>,
    key: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl WpaSupplicant {
    /// # Errors
    ///
    /// * `InterfaceNotFound` - not a wireless interface
    pub fn new(interface: &str) -> Result<Self> {
        Self::with_runner(interface, Arc::new(SystemRunner))
    }

    pub fn with_runner(interface: &str, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let mut wireless = WirelessManager::with_runner(Arc::clone(&runner));
        if !wireless.is_wireless_interface(interface)? {
            return Err(NetshellError::InterfaceNotFound {
                name: interface.to_string(),
            });
        }

        let pid_file = Path::new(DEFAULT_PID_DIR).join(format!("WPA_{}.pid", interface));
        let config_file = Path::new(DEFAULT_CONFIG_DIR).join(format!("WPA_{}", interface));
        Ok(Self {
            interface: interface.to_string(),
            supervisor: DaemonSupervisor::new(
                "wpa_supplicant",
                interface,
                pid_file,
                STARTUP_WINDOW,
                Arc::clone(&runner),
            ),
            config_file,
            ssid: None,
            key: None,
            runner,
        })
    }

    pub fn with_pid_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let pid_file = dir
            .as_ref()
            .join(format!("WPA_{}.pid", self.interface));
        self.supervisor = self.supervisor.with_pid_file(pid_file);
        self
    }

    pub fn with_config_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config_file = dir.as_ref().join(format!("WPA_{}", self.interface));
        self
    }

    /// Window for PID file appearance on start and disappearance on stop.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.supervisor = self.supervisor.with_wait_timeout(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.supervisor = self.supervisor.with_poll_interval(interval);
        self
    }

    pub fn set_ssid(&mut self, ssid: &str) {
        self.ssid = Some(ssid.to_string());
    }

    pub fn set_key(&mut self, key: &str) {
        self.key = Some(key.to_string());
    }

    pub fn pid_file(&self) -> &Path {
        self.supervisor.pid_file()
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn pid(&self) -> Result<i32> {
        self.supervisor.pid()
    }

    /// Write the config for the configured network and launch the daemon.
    ///
    /// Returns whether the supplicant came up within the startup window. A
    /// previously running instance is stopped first.
    ///
    /// # Errors
    ///
    /// * `CannotGenerateKey` - no SSID/passphrase set, or `wpa_passphrase`
    ///   produced no usable key
    pub fn start(&self) -> Result<bool> {
        self.write_config()?;

        let pid_file = self.supervisor.pid_file().display().to_string();
        let config_file = self.config_file.display().to_string();
        self.supervisor.launch(
            "wpa_supplicant",
            &[
                "-B",
                "-i",
                &self.interface,
                "-Dwext",
                "-c",
                &config_file,
                "-P",
                &pid_file,
            ],
        )
    }

    /// SIGTERM, then SIGKILL on timeout. Returns whether the daemon is gone.
    pub fn stop(&self) -> Result<bool> {
        self.supervisor.stop()
    }

    pub fn terminate(&self) -> Result<bool> {
        self.supervisor.terminate()
    }

    fn write_config(&self) -> Result<()> {
        let ssid = self.ssid.as_deref().ok_or_else(|| {
            NetshellError::CannotGenerateKey {
                ssid: String::new(),
                reason: "no SSID configured".to_string(),
            }
        })?;
        let key = self.key.as_deref().ok_or_else(|| {
            NetshellError::CannotGenerateKey {
                ssid: ssid.to_string(),
                reason: "no passphrase configured".to_string(),
            }
        })?;

        let output = self.runner.run("wpa_passphrase", &[ssid, key])?;
        let psk = PSK_RE
            .captures(&output.stdout)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| NetshellError::CannotGenerateKey {
                ssid: ssid.to_string(),
                reason: "wpa_passphrase output carried no psk field".to_string(),
            })?;

        let config = format!("network={{\n    ssid=\"{}\"\n    psk={}\n}}\n", ssid, psk);
        fs::write(&self.config_file, config).map_err(|e| {
            NetshellError::io_error(format!("writing {}", self.config_file.display()), e)
        })?;
        debug!(
            "wrote supplicant config for '{}' at {}",
            ssid,
            self.config_file.display()
        );
        Ok(())
    }
}

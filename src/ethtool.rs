//! Link diagnostics via `ethtool`.
//!
//! Reports what the PHY negotiated: link speed and whether a carrier is
//! detected. Both fields are genuinely optional in real output (a downed
//! interface prints `Speed: Unknown!` and no link line), so absence reads as
//! defaults rather than errors.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::SnapshotCache;
use crate::error::{NetshellError, Result};
use crate::link::InterfaceManager;
use crate::runner::{CommandRunner, SystemRunner};

static SPEED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Speed: ([0-9]+[/\w]*)").unwrap());
static LINK_DETECTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Link detected: yes").unwrap());

/// Negotiated link state of one interface.
#[derive(Debug, Clone)]
pub struct EthtoolRecord {
    /// Negotiated speed as printed, e.g. `1000Mb/s`; empty when the tool
    /// reports none.
    pub speed: String,
    pub connected: bool,
}

/// Diagnostics probe bound to one interface.
pub struct EthtoolManager {
    interface: String,
    runner: Arc<dyn CommandRunner>,
    cache: SnapshotCache<EthtoolRecord>,
}

impl EthtoolManager {
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

        Ok(Self {
            interface: interface.to_string(),
            runner,
            cache: SnapshotCache::new(),
        })
    }

    /// Drop the cached probe; the next query runs `ethtool` again.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    fn record(&mut self) -> Result<&EthtoolRecord> {
        let runner = Arc::clone(&self.runner);
        let interface = self.interface.clone();
        let snapshot = self.cache.get_or_refresh(move || {
            let output = runner.run("ethtool", &[&interface])?;
            let mut records = HashMap::new();
            records.insert(interface.clone(), parse_ethtool(&output.stdout));
            Ok(records)
        })?;
        Ok(snapshot
            .get(&self.interface)
            .expect("inserted on refresh"))
    }

    /// Negotiated link speed as printed by the tool, or empty string.
    pub fn speed(&mut self) -> Result<String> {
        Ok(self.record()?.speed.clone())
    }

    /// Whether a carrier is detected on the wire.
    pub fn is_connected(&mut self) -> Result<bool> {
        Ok(self.record()?.connected)
    }
}

pub(crate) fn parse_ethtool(output: &str) -> EthtoolRecord {
    EthtoolRecord {
        speed: SPEED_RE
            .captures(output)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default(),
        connected: LINK_DETECTED_RE.is_match(output),
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

    const CONNECTED: &str = "\
Settings for eth0:
	Supported ports: [ TP ]
	Speed: 1000Mb/s
	Duplex: Full
	Link detected: yes
";

    const NO_CARRIER: &str = "\
Settings for eth0:
	Supported ports: [ TP ]
	Speed: Unknown!
	Duplex: Unknown! (255)
	Link detected: no
";

    fn probe(runner: Arc<FakeRunner>) -> EthtoolManager {
        runner.set_output("ifconfig", ETH0);
        EthtoolManager::with_runner("eth0", runner as Arc<dyn CommandRunner>).unwrap()
    }

    #[test]
    fn parses_speed_and_carrier() {
        let record = parse_ethtool(CONNECTED);
        assert_eq!(record.speed, "1000Mb/s");
        assert!(record.connected);
    }

    #[test]
    fn missing_fields_read_as_defaults() {
        let record = parse_ethtool(NO_CARRIER);
        assert_eq!(record.speed, "");
        assert!(!record.connected);
    }

    #[test]
    fn construction_rejects_unknown_interfaces() {
        let runner = Arc::new(FakeRunner::new());
        runner.set_output("ifconfig", ETH0);
        assert!(matches!(
            EthtoolManager::with_runner("wlan9", runner as Arc<dyn CommandRunner>),
            Err(NetshellError::InterfaceNotFound { .. })
        ));
    }

    #[test]
    fn repeated_queries_reuse_one_probe_until_invalidated() {
        let runner = Arc::new(FakeRunner::new());
        runner.set_output("ethtool", CONNECTED);
        let mut probe = probe(Arc::clone(&runner));

        assert!(probe.is_connected().unwrap());
        assert_eq!(probe.speed().unwrap(), "1000Mb/s");
        assert_eq!(runner.count("ethtool"), 1);

        probe.invalidate();
        runner.set_output("ethtool", NO_CARRIER);
        assert!(!probe.is_connected().unwrap());
        assert_eq!(runner.count("ethtool"), 2);
    }
}

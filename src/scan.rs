//! Network discovery via `iwlist <interface> scan`.
//!
//! Scan results are keyed by SSID: multiple cells advertising the same SSID
//! collapse into one record that keeps the strongest signal and the union of
//! advertised capabilities. Every optional field is genuinely optional in
//! real scan output, so their absence is never a parse error.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::cache::SnapshotCache;
use crate::error::{NetshellError, Result};
use crate::runner::{CommandRunner, SystemRunner};
use crate::wireless::WirelessManager;

static ESSID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"ESSID:"([^"]*)""#).unwrap());
static CAPABILITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"IE: (.+)").unwrap());
static ENCRYPTION_ON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Encryption key:on").unwrap());
static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Signal level=(\d+)").unwrap());

/// One visible network, merged across all cells advertising its SSID.
#[derive(Debug, Clone)]
pub struct NetworkRecord {
    pub ssid: String,
    /// Capability strings from `IE:` lines, in encounter order.
    pub capabilities: Vec<String>,
    pub encryption_active: bool,
    /// Strongest signal level seen for this SSID.
    pub signal_strength: u32,
}

impl NetworkRecord {
    fn new(ssid: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            capabilities: Vec::new(),
            encryption_active: false,
            signal_strength: 0,
        }
    }
}

/// Scanner bound to one wireless interface.
pub struct WirelessScanner {
    interface: String,
    runner: Arc<dyn CommandRunner>,
    cache: SnapshotCache<NetworkRecord>,
}

impl WirelessScanner {
    /// # Errors
    ///
    /// * `InterfaceNotFound` - `interface` is not wireless-capable
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

        Ok(Self {
            interface: interface.to_string(),
            runner,
            cache: SnapshotCache::new(),
        })
    }

    /// Drop the cached scan; the next query triggers a fresh one.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    fn snapshot(&mut self) -> Result<&HashMap<String, NetworkRecord>> {
        let runner = Arc::clone(&self.runner);
        let interface = self.interface.clone();
        self.cache.get_or_refresh(move || {
            let output = runner.run("iwlist", &[&interface, "scan"])?;
            let networks = parse_scan(&output.stdout);
            debug!("scan on {} found {} networks", interface, networks.len());
            Ok(networks)
        })
    }

    fn record(&mut self, ssid: &str) -> Result<&NetworkRecord> {
        let interface = self.interface.clone();
        self.snapshot()?
            .get(ssid)
            .ok_or(NetshellError::SsidNotFound {
                ssid: ssid.to_string(),
                interface,
            })
    }

    /// All visible networks, sorted by SSID.
    pub fn scan_networks(&mut self) -> Result<Vec<NetworkRecord>> {
        let mut networks: Vec<NetworkRecord> = self.snapshot()?.values().cloned().collect();
        networks.sort_by(|a, b| a.ssid.cmp(&b.ssid));
        Ok(networks)
    }

    pub fn is_visible(&mut self, ssid: &str) -> Result<bool> {
        Ok(self.snapshot()?.contains_key(ssid))
    }

    /// # Errors
    ///
    /// * `SsidNotFound` - network absent from the current scan
    pub fn is_encryption_active(&mut self, ssid: &str) -> Result<bool> {
        Ok(self.record(ssid)?.encryption_active)
    }

    pub fn encryption_types(&mut self, ssid: &str) -> Result<Vec<String>> {
        Ok(self.record(ssid)?.capabilities.clone())
    }

    pub fn signal_strength(&mut self, ssid: &str) -> Result<u32> {
        Ok(self.record(ssid)?.signal_strength)
    }
}

/// Parse `iwlist scan` output. An `ESSID:"..."` line selects (or creates) the
/// record all following field lines apply to, until the next `ESSID` line.
/// Field lines before the first `ESSID` belong to scan headers and are
/// skipped.
pub(crate) fn parse_scan(output: &str) -> HashMap<String, NetworkRecord> {
    let mut networks: HashMap<String, NetworkRecord> = HashMap::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if let Some(caps) = ESSID_RE.captures(line) {
            let ssid = caps[1].to_string();
            networks
                .entry(ssid.clone())
                .or_insert_with(|| NetworkRecord::new(&ssid));
            current = Some(ssid);
            continue;
        }

        let record = match &current {
            Some(ssid) => networks.get_mut(ssid).expect("inserted on ESSID line"),
            None => continue,
        };

        if let Some(caps) = CAPABILITY_RE.captures(line) {
            record.capabilities.push(caps[1].trim().to_string());
        }
        if ENCRYPTION_ON_RE.is_match(line) {
            record.encryption_active = true;
        }
        if let Some(caps) = SIGNAL_RE.captures(line) {
            if let Ok(level) = caps[1].parse::<u32>() {
                record.signal_strength = record.signal_strength.max(level);
            }
        }
    }

    networks
}

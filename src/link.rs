//! Wired link management via `ifconfig`.
//!
//! Keeps a lazy snapshot of `ifconfig -a` output and validates every
//! operation against it. Mutations never trust the command's exit status:
//! they invalidate the snapshot and verify by re-reading the field they
//! changed.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::cache::SnapshotCache;
use crate::error::{NetshellError, Result};
use crate::runner::{CommandRunner, SystemRunner};
use crate::wireless::WirelessManager;

static LINK_TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Link encap:(\w+)").unwrap());
static HWADDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"HWaddr ((?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2})").unwrap());
static INET_ADDR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"inet addr:([0-9.]+)").unwrap());
static NETMASK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Mask:([0-9.]+)").unwrap());
static UP_FLAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bUP\b").unwrap());
static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").unwrap());

/// Administrative state of a link. Absence of the `UP` flag in raw output
/// means [`LinkStatus::Down`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "UP"),
            LinkStatus::Down => write!(f, "DOWN"),
        }
    }
}

impl FromStr for LinkStatus {
    type Err = NetshellError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(LinkStatus::Up),
            "down" => Ok(LinkStatus::Down),
            other => Err(NetshellError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// Parsed state of one interface, recomputed wholesale on every refresh.
#[derive(Debug, Clone)]
pub struct InterfaceRecord {
    pub name: String,
    pub link_type: Option<String>,
    pub hardware_address: Option<String>,
    pub address: Option<String>,
    pub netmask: Option<String>,
    pub status: LinkStatus,
}

impl InterfaceRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            link_type: None,
            hardware_address: None,
            address: None,
            netmask: None,
            status: LinkStatus::Down,
        }
    }
}

/// Manager for wired link state (addresses, MAC, netmask, up/down).
pub struct InterfaceManager {
    runner: Arc<dyn CommandRunner>,
    cache: SnapshotCache<InterfaceRecord>,
}

impl InterfaceManager {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            cache: SnapshotCache::new(),
        }
    }

    fn snapshot(&mut self) -> Result<&HashMap<String, InterfaceRecord>> {
        let runner = Arc::clone(&self.runner);
        self.cache.get_or_refresh(move || {
            let output = runner.run("ifconfig", &["-a"])?;
            parse_interfaces(&output.stdout)
        })
    }

    fn record(&mut self, interface: &str) -> Result<&InterfaceRecord> {
        self.snapshot()?
            .get(interface)
            .ok_or_else(|| NetshellError::InterfaceNotFound {
                name: interface.to_string(),
            })
    }

    /// Names of all interfaces in the current snapshot, sorted.
    pub fn interface_names(&mut self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.snapshot()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn is_valid_interface(&mut self, interface: &str) -> Result<bool> {
        Ok(self.snapshot()?.contains_key(interface))
    }

    /// Full parsed record for an interface.
    ///
    /// # Errors
    ///
    /// * `InterfaceNotFound` - interface absent from the snapshot
    pub fn properties(&mut self, interface: &str) -> Result<InterfaceRecord> {
        Ok(self.record(interface)?.clone())
    }

    /// IPv4 address of an interface, or empty string when unset (absence is
    /// valid state, not an error).
    pub fn address(&mut self, interface: &str) -> Result<String> {
        Ok(self.record(interface)?.address.clone().unwrap_or_default())
    }

    /// MAC address of an interface, or empty string when unset.
    pub fn hardware_address(&mut self, interface: &str) -> Result<String> {
        Ok(self
            .record(interface)?
            .hardware_address
            .clone()
            .unwrap_or_default())
    }

    /// Netmask of an interface, or empty string when unset.
    pub fn netmask(&mut self, interface: &str) -> Result<String> {
        Ok(self.record(interface)?.netmask.clone().unwrap_or_default())
    }

    pub fn status(&mut self, interface: &str) -> Result<LinkStatus> {
        Ok(self.record(interface)?.status)
    }

    /// Assign an IPv4 address and verify it by re-reading the snapshot.
    ///
    /// Returns whether the re-read address matches the request.
    ///
    /// # Errors
    ///
    /// * `InvalidAddress` - not a dotted-quad IPv4 address
    /// * `InterfaceNotFound` - interface absent from the snapshot
    pub fn set_address(&mut self, interface: &str, address: &str) -> Result<bool> {
        validate_ipv4(address)?;

        self.execute(interface, &["add", address])?;
        self.cache.invalidate();

        let applied = self.address(interface)? == address;
        if applied {
            info!("Interface {} address set to {}", interface, address);
        } else {
            warn!(
                "Address change on {} did not verify (wanted {})",
                interface, address
            );
        }
        Ok(applied)
    }

    /// Assign a netmask and verify it by re-reading the snapshot.
    pub fn set_netmask(&mut self, interface: &str, netmask: &str) -> Result<bool> {
        validate_ipv4(netmask)?;

        self.execute(interface, &["netmask", netmask])?;
        self.cache.invalidate();

        Ok(self.netmask(interface)? == netmask)
    }

    /// Change the MAC address of an interface.
    ///
    /// The kernel rejects MAC changes on a live link, so this is a three-step
    /// transaction: bring the interface down, apply the change, restore the
    /// previous status. Each status step is individually verified and fails
    /// the whole operation with `StatusChangeFailed`; a failed restore leaves
    /// the new MAC applied.
    ///
    /// # Errors
    ///
    /// * `InvalidAddress` - not six colon- or hyphen-separated hex octets
    /// * `InterfaceNotFound` - interface absent from the snapshot
    /// * `StatusChangeFailed` - the down or restore-up step did not verify
    pub fn set_hardware_address(&mut self, interface: &str, mac: &str) -> Result<bool> {
        if !MAC_RE.is_match(mac) {
            return Err(NetshellError::InvalidAddress {
                value: mac.to_string(),
                reason: "expected six colon- or hyphen-separated hex octets".to_string(),
            });
        }

        let was_up = self.status(interface)? == LinkStatus::Up;
        if was_up && !self.set_status(interface, LinkStatus::Down)? {
            return Err(NetshellError::StatusChangeFailed {
                interface: interface.to_string(),
                desired_state: LinkStatus::Down.to_string(),
            });
        }

        self.execute(interface, &["hw", "ether", mac])?;
        self.cache.invalidate();

        if was_up && !self.set_status(interface, LinkStatus::Up)? {
            // The MAC may already have been applied; the operation still
            // fails because the link was not restored.
            return Err(NetshellError::StatusChangeFailed {
                interface: interface.to_string(),
                desired_state: LinkStatus::Up.to_string(),
            });
        }

        let applied = self
            .hardware_address(interface)?
            .eq_ignore_ascii_case(mac);
        if applied {
            info!("Interface {} hardware address set to {}", interface, mac);
        }
        Ok(applied)
    }

    /// Bring an interface up or down and verify the transition.
    ///
    /// Bringing a wireless interface down first tears down any association
    /// (best-effort; a failure is logged, not propagated).
    pub fn set_status(&mut self, interface: &str, status: LinkStatus) -> Result<bool> {
        match status {
            LinkStatus::Up => self.execute(interface, &["up"])?,
            LinkStatus::Down => {
                self.disconnect_if_wireless(interface);
                self.execute(interface, &["down", "add", "0.0.0.0"])?;
            }
        }
        self.cache.invalidate();

        let applied = self.status(interface)? == status;
        if applied {
            info!("Interface {} set to {}", interface, status);
        }
        Ok(applied)
    }

    fn disconnect_if_wireless(&mut self, interface: &str) {
        let mut wireless = WirelessManager::with_runner(Arc::clone(&self.runner));
        match wireless.is_wireless_interface(interface) {
            Ok(true) => {
                if let Err(e) = wireless.disconnect(interface) {
                    warn!(
                        "Failed to disconnect {} before bringing it down: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Could not query wireless state of {}: {}", interface, e),
        }
    }

    /// Run `ifconfig <interface> <args..>` after validating the target
    /// against the snapshot.
    fn execute(&mut self, interface: &str, args: &[&str]) -> Result<()> {
        if !self.is_valid_interface(interface)? {
            return Err(NetshellError::InterfaceNotFound {
                name: interface.to_string(),
            });
        }

        let mut argv = vec![interface];
        argv.extend_from_slice(args);
        self.runner.run("ifconfig", &argv)?;
        Ok(())
    }
}

impl Default for InterfaceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_ipv4(address: &str) -> Result<()> {
    address
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| NetshellError::InvalidAddress {
            value: address.to_string(),
            reason: "not a dotted-quad IPv4 address".to_string(),
        })
}

/// Parse `ifconfig -a` output. A non-indented line opens a new interface
/// block (name = first token); indented lines carry fields for the current
/// block. Any field line arriving before the first block is a parse error,
/// which leaves the cache invalid rather than half-populated.
pub(crate) fn parse_interfaces(output: &str) -> Result<HashMap<String, InterfaceRecord>> {
    let mut interfaces = HashMap::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        if !line.starts_with(' ') && !line.starts_with('\t') {
            let name = line
                .split_whitespace()
                .next()
                .ok_or_else(|| NetshellError::ParseError {
                    what: "ifconfig output".to_string(),
                    reason: format!("unparseable interface line: {:?}", line),
                })?;
            interfaces.insert(name.to_string(), InterfaceRecord::new(name));
            current = Some(name.to_string());
        }

        let name = match &current {
            Some(name) => name,
            None => {
                return Err(NetshellError::ParseError {
                    what: "ifconfig output".to_string(),
                    reason: "field line before any interface block".to_string(),
                })
            }
        };
        let record = interfaces.get_mut(name).expect("inserted with block");

        if let Some(caps) = LINK_TYPE_RE.captures(line) {
            record.link_type = Some(caps[1].to_string());
        }
        if let Some(caps) = HWADDR_RE.captures(line) {
            record.hardware_address = Some(caps[1].to_string());
        }
        if let Some(caps) = INET_ADDR_RE.captures(line) {
            record.address = Some(caps[1].to_string());
        }
        if let Some(caps) = NETMASK_RE.captures(line) {
            record.netmask = Some(caps[1].to_string());
        }
        if UP_FLAG_RE.is_match(line) {
            record.status = LinkStatus::Up;
        }
    }

    Ok(interfaces)
}

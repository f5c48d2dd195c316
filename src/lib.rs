//! Process-oriented control layer over classic Linux network tooling.
//!
//! Everything here shells out to the venerable interface utilities
//! (`ifconfig`, `iwconfig`, `iwlist`, `brctl`) and supervises the busybox
//! DHCP client and `wpa_supplicant` through their PID files. That makes the
//! crate a fit for embedded systems where netlink-native stacks are
//! unavailable but the classic tools are guaranteed present.
//!
//! Two conventions hold across the whole API:
//!
//! * **Snapshots.** Each manager caches one parsed snapshot of "everything
//!   of its kind" and refreshes it lazily, at most once per invalidation.
//! * **Verify by reread.** Mutations never trust an exit status. They run
//!   the command, invalidate the snapshot, re-read it and return `Ok(bool)`
//!   for "did the change verify". `Err` always means the operation could not
//!   even be attempted.
//!
//! Managers own their caches and take `&mut self` for anything that may
//! refresh; there is no interior locking. Embedders that share a manager
//! across threads should wrap it in a mutex to serialize lifecycle
//! transitions on an interface.
//!
//! ```no_run
//! use netshell::{InterfaceManager, LinkStatus};
//!
//! # fn main() -> netshell::Result<()> {
//! let mut links = InterfaceManager::new();
//! if links.set_address("eth0", "192.168.1.10")? {
//!     links.set_status("eth0", LinkStatus::Up)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cache;
pub mod daemon;
pub mod dhcp;
pub mod error;
pub mod ethtool;
pub mod link;
pub mod logging;
pub mod runner;
pub mod scan;
pub mod supplicant;
pub mod wireless;

pub use bridge::BridgeManager;
pub use cache::SnapshotCache;
pub use daemon::DaemonSupervisor;
pub use dhcp::DhcpClient;
pub use error::{NetshellError, Result};
pub use ethtool::{EthtoolManager, EthtoolRecord};
pub use link::{InterfaceManager, InterfaceRecord, LinkStatus};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use scan::{NetworkRecord, WirelessScanner};
pub use supplicant::WpaSupplicant;
pub use wireless::{EncryptionType, WirelessManager, WirelessRecord};

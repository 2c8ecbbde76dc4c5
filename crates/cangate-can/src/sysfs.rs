//! Interface traffic counters from `/sys/class/net/<bus>/statistics`

use std::io;
use std::path::{Path, PathBuf};

/// Default sysfs location of network interfaces
pub const SYSFS_NET: &str = "/sys/class/net";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

impl InterfaceCounters {
    /// Counter growth since `earlier`; a counter reset yields zero
    pub fn delta(&self, earlier: &InterfaceCounters) -> InterfaceCounters {
        InterfaceCounters {
            rx_bytes: self.rx_bytes.saturating_sub(earlier.rx_bytes),
            rx_packets: self.rx_packets.saturating_sub(earlier.rx_packets),
            tx_bytes: self.tx_bytes.saturating_sub(earlier.tx_bytes),
            tx_packets: self.tx_packets.saturating_sub(earlier.tx_packets),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SysfsCounters {
    root: PathBuf,
}

impl Default for SysfsCounters {
    fn default() -> Self {
        Self::with_root(SYSFS_NET)
    }
}

impl SysfsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from another tree laid out like `/sys/class/net`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn read(&self, bus: &str) -> io::Result<InterfaceCounters> {
        let dir = self.root.join(bus).join("statistics");
        Ok(InterfaceCounters {
            rx_bytes: read_counter(&dir, "rx_bytes").await?,
            rx_packets: read_counter(&dir, "rx_packets").await?,
            tx_bytes: read_counter(&dir, "tx_bytes").await?,
            tx_packets: read_counter(&dir, "tx_packets").await?,
        })
    }
}

async fn read_counter(dir: &Path, name: &str) -> io::Result<u64> {
    let text = tokio::fs::read_to_string(dir.join(name)).await?;
    text.trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{name}: {e}")))
}

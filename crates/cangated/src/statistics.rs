//! Per-bus traffic statistics
//!
//! Clients toggle collection with `< bus E 1 >`. The collector is one task
//! owning the set of enabled buses; connections talk to it over a channel
//! through a cloneable [`StatisticsHandle`].

use std::collections::BTreeMap;
use std::time::Duration;

use cangate_can::{InterfaceCounters, SysfsCounters};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// One sample for one bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStatistics {
    pub bus: String,
    pub counters: InterfaceCounters,
    /// Growth since the previous sample (zero for the first one)
    pub delta: InterfaceCounters,
}

#[derive(Debug)]
enum Control {
    Enable(String),
    Disable(String),
}

#[derive(Debug, Clone)]
pub struct StatisticsHandle {
    control: mpsc::UnboundedSender<Control>,
    updates: broadcast::Sender<BusStatistics>,
}

impl StatisticsHandle {
    pub fn set_enabled(&self, bus: &str, enabled: bool) {
        let msg = if enabled {
            Control::Enable(bus.to_string())
        } else {
            Control::Disable(bus.to_string())
        };
        if self.control.send(msg).is_err() {
            tracing::debug!(bus, "Statistics collector not running");
        }
    }

    /// Receive every published sample
    ///
    /// The collector always logs samples; this channel is the hook for
    /// in-process consumers that embed [`crate::ConnectionManager`]. The
    /// `cangated` binary has none, so samples are sent into an empty channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BusStatistics> {
        self.updates.subscribe()
    }
}

pub struct StatisticsService {
    counters: SysfsCounters,
    interval: Duration,
    control_rx: mpsc::UnboundedReceiver<Control>,
    updates: broadcast::Sender<BusStatistics>,
    /// Enabled buses and their previous sample
    enabled: BTreeMap<String, Option<InterfaceCounters>>,
}

impl StatisticsService {
    pub fn new(counters: SysfsCounters, interval: Duration) -> (Self, StatisticsHandle) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(64);
        let handle = StatisticsHandle {
            control,
            updates: updates.clone(),
        };
        let service = Self {
            counters,
            interval,
            control_rx,
            updates,
            enabled: BTreeMap::new(),
        };
        (service, handle)
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.control_rx.recv() => match msg {
                    Some(Control::Enable(bus)) => {
                        tracing::info!(bus = %bus, "Statistics enabled");
                        self.enabled.entry(bus).or_insert(None);
                    }
                    Some(Control::Disable(bus)) => {
                        if self.enabled.remove(&bus).is_some() {
                            tracing::info!(bus = %bus, "Statistics disabled");
                        }
                    }
                    None => break,
                },
                _ = ticker.tick(), if !self.enabled.is_empty() => self.sample().await,
            }
        }

        tracing::debug!("Statistics collector stopped");
    }

    async fn sample(&mut self) {
        for (bus, previous) in self.enabled.iter_mut() {
            let counters = match self.counters.read(bus).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(bus = %bus, error = %e, "Failed to read interface statistics");
                    continue;
                }
            };
            let delta = previous
                .map(|p| counters.delta(&p))
                .unwrap_or_default();
            *previous = Some(counters);

            tracing::info!(
                bus = %bus,
                rx_packets = counters.rx_packets,
                rx_bytes = counters.rx_bytes,
                tx_packets = counters.tx_packets,
                tx_bytes = counters.tx_bytes,
                "Bus statistics"
            );

            // No subscribers is fine
            let _ = self.updates.send(BusStatistics {
                bus: bus.clone(),
                counters,
                delta,
            });
        }
    }
}

//! In-process BCM stand-in for tests and `--mock` runs
//!
//! A [`MockScheduler`] is shared by every endpoint it opens, like the kernel
//! is shared by every BCM socket. It counts every dispatch and keeps the most
//! recent ones (see [`DEFAULT_HISTORY`]), tracks installed
//! cyclic jobs and receive filters per endpoint, and loops `TX_SEND` frames
//! back as `RX_CHANGED` deliveries to endpoints holding a matching filter.
//! Content filters match on id only; payload masks are not modelled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cangate_proto::InboundFrame;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bcm::{BcmDelivery, BcmOpcode, BcmOperation};
use crate::endpoint::{EndpointFactory, SchedulingEndpoint};
use crate::error::BcmError;

/// Dispatches kept by [`MockScheduler::new`]
pub const DEFAULT_HISTORY: usize = 16 * 1024;

/// One recorded dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub ifindex: u32,
    pub op: BcmOperation,
}

struct Slot {
    tx: mpsc::UnboundedSender<BcmDelivery>,
    /// (ifindex, can_id)
    filters: HashSet<(u32, u32)>,
    jobs: HashSet<(u32, u32)>,
}

struct State {
    next_id: u64,
    endpoints: HashMap<u64, Slot>,
    history: VecDeque<Dispatched>,
    history_limit: usize,
    dispatch_total: usize,
    fail_open: bool,
}

#[derive(Clone)]
pub struct MockScheduler {
    state: Arc<Mutex<State>>,
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScheduler {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Keep at most `limit` dispatches for [`dispatched`](Self::dispatched)
    pub fn with_history(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_id: 0,
                endpoints: HashMap::new(),
                history: VecDeque::new(),
                history_limit: limit,
                dispatch_total: 0,
                fail_open: false,
            })),
        }
    }

    /// Make subsequent `open` calls fail, as if the CAN stack were missing
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn open_endpoints(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    /// Most recent dispatches, oldest first
    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Dispatches since creation or the last [`clear_dispatched`](Self::clear_dispatched)
    pub fn dispatch_count(&self) -> usize {
        self.state.lock().dispatch_total
    }

    pub fn clear_dispatched(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.dispatch_total = 0;
    }

    /// Cyclic jobs currently installed across all endpoints
    pub fn active_jobs(&self) -> HashSet<(u32, u32)> {
        let state = self.state.lock();
        state
            .endpoints
            .values()
            .flat_map(|slot| slot.jobs.iter().copied())
            .collect()
    }

    /// Receive filters currently installed across all endpoints
    pub fn active_filters(&self) -> HashSet<(u32, u32)> {
        let state = self.state.lock();
        state
            .endpoints
            .values()
            .flat_map(|slot| slot.filters.iter().copied())
            .collect()
    }

    /// Simulate a frame arriving on interface `ifindex`
    pub fn inject(&self, ifindex: u32, frame: InboundFrame) {
        let delivery = BcmDelivery {
            ifindex,
            opcode: BcmOpcode::RxChanged,
            can_id: frame.id,
            frame: Some(frame),
        };
        self.state.lock().deliver_filtered(delivery);
    }

    /// Push a delivery to every open endpoint, filters ignored
    pub fn inject_raw(&self, delivery: BcmDelivery) {
        let state = self.state.lock();
        for slot in state.endpoints.values() {
            let _ = slot.tx.send(delivery.clone());
        }
    }

    /// Poll until at least `count` dispatches were recorded
    pub async fn wait_for_dispatches(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.dispatch_count() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, endpoint: u64, ifindex: u32, op: &BcmOperation) {
        let mut state = self.state.lock();
        state.dispatch_total += 1;
        if state.history_limit > 0 {
            if state.history.len() == state.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(Dispatched { ifindex, op: *op });
        }

        let key = (ifindex, op.can_id);
        match op.opcode {
            BcmOpcode::TxSend => {
                let frame = InboundFrame::new(op.can_id, op.dlc, op.data);
                state.deliver_filtered(BcmDelivery {
                    ifindex,
                    opcode: BcmOpcode::RxChanged,
                    can_id: op.can_id,
                    frame: Some(frame),
                });
            }
            BcmOpcode::TxSetup => {
                if let Some(slot) = state.endpoints.get_mut(&endpoint) {
                    slot.jobs.insert(key);
                }
            }
            BcmOpcode::TxDelete => {
                if let Some(slot) = state.endpoints.get_mut(&endpoint) {
                    slot.jobs.remove(&key);
                }
            }
            BcmOpcode::RxSetup => {
                if let Some(slot) = state.endpoints.get_mut(&endpoint) {
                    slot.filters.insert(key);
                }
            }
            BcmOpcode::RxDelete => {
                if let Some(slot) = state.endpoints.get_mut(&endpoint) {
                    slot.filters.remove(&key);
                }
            }
            _ => {}
        }
    }
}

impl State {
    fn deliver_filtered(&self, delivery: BcmDelivery) {
        let key = (delivery.ifindex, delivery.can_id);
        for slot in self.endpoints.values() {
            if slot.filters.contains(&key) {
                let _ = slot.tx.send(delivery.clone());
            }
        }
    }
}

impl EndpointFactory for MockScheduler {
    fn open(&self) -> Result<Box<dyn SchedulingEndpoint>, BcmError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(BcmError::Unsupported("mock endpoint unavailable".into()));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(
            id,
            Slot {
                tx,
                filters: HashSet::new(),
                jobs: HashSet::new(),
            },
        );
        tracing::debug!(endpoint = id, "Mock endpoint opened");

        Ok(Box::new(MockEndpoint {
            id,
            scheduler: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }))
    }
}

struct MockEndpoint {
    id: u64,
    scheduler: MockScheduler,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BcmDelivery>>,
}

#[async_trait]
impl SchedulingEndpoint for MockEndpoint {
    fn dispatch(&self, ifindex: u32, op: &BcmOperation) -> Result<(), BcmError> {
        self.scheduler.record(self.id, ifindex, op);
        Ok(())
    }

    async fn recv(&self) -> Result<BcmDelivery, BcmError> {
        self.rx.lock().await.recv().await.ok_or(BcmError::Closed)
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        // Closing a BCM socket drops its jobs and filters
        self.scheduler.state.lock().endpoints.remove(&self.id);
        tracing::debug!(endpoint = self.id, "Mock endpoint closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcm::BcmFlags;
    use cangate_proto::{CanData, Interval};

    fn filter(can_id: u32) -> BcmOperation {
        BcmOperation::new(
            BcmOpcode::RxSetup,
            BcmFlags::RX_FILTER_ID | BcmFlags::SET_TIMER,
            can_id,
        )
    }

    #[tokio::test]
    async fn test_send_loops_back_to_filter() {
        let scheduler = MockScheduler::new();
        let endpoint = scheduler.open().unwrap();
        endpoint.dispatch(1, &filter(0x123)).unwrap();

        let frame = CanData::new(0x123, &[0xAA, 0xBB]).unwrap();
        let send = BcmOperation::new(BcmOpcode::TxSend, BcmFlags::NONE, 0).with_frame(&frame);
        endpoint.dispatch(1, &send).unwrap();

        let delivery = endpoint.recv().await.unwrap();
        assert_eq!(delivery.ifindex, 1);
        assert_eq!(delivery.opcode, BcmOpcode::RxChanged);
        let got = delivery.frame.unwrap();
        assert_eq!(got.id, 0x123);
        assert_eq!(&got.data[..got.dlc as usize], &[0xAA, 0xBB]);
        assert_eq!(scheduler.dispatch_count(), 2);
    }

    #[tokio::test]
    async fn test_inject_respects_interface_and_id() {
        let scheduler = MockScheduler::new();
        let endpoint = scheduler.open().unwrap();
        endpoint.dispatch(2, &filter(0x10)).unwrap();

        scheduler.inject(1, InboundFrame::new(0x10, 0, [0; 8]));
        scheduler.inject(2, InboundFrame::new(0x11, 0, [0; 8]));
        scheduler.inject(2, InboundFrame::new(0x10, 1, [7, 0, 0, 0, 0, 0, 0, 0]));

        let delivery = endpoint.recv().await.unwrap();
        assert_eq!(delivery.ifindex, 2);
        assert_eq!(delivery.can_id, 0x10);
        assert_eq!(delivery.frame.unwrap().dlc, 1);
    }

    #[test]
    fn test_jobs_tracked_until_delete() {
        let scheduler = MockScheduler::new();
        let endpoint = scheduler.open().unwrap();
        let frame = CanData::new(0x200, &[0xFF]).unwrap();
        let setup = BcmOperation::new(
            BcmOpcode::TxSetup,
            BcmFlags::SET_TIMER | BcmFlags::START_TIMER,
            0,
        )
        .with_interval(Interval::new(1, 0))
        .with_frame(&frame);

        endpoint.dispatch(1, &setup).unwrap();
        assert!(scheduler.active_jobs().contains(&(1, 0x200)));

        let delete = BcmOperation::new(BcmOpcode::TxDelete, BcmFlags::NONE, 0x200);
        endpoint.dispatch(1, &delete).unwrap();
        assert!(scheduler.active_jobs().is_empty());
    }

    #[test]
    fn test_drop_releases_endpoint() {
        let scheduler = MockScheduler::new();
        let endpoint = scheduler.open().unwrap();
        endpoint.dispatch(1, &filter(0x1)).unwrap();
        assert_eq!(scheduler.open_endpoints(), 1);

        drop(endpoint);
        assert_eq!(scheduler.open_endpoints(), 0);
        assert!(scheduler.active_filters().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let scheduler = MockScheduler::with_history(4);
        let endpoint = scheduler.open().unwrap();
        for can_id in 0..10 {
            endpoint.dispatch(1, &filter(can_id)).unwrap();
        }

        assert_eq!(scheduler.dispatch_count(), 10);
        let ids: Vec<u32> = scheduler.dispatched().iter().map(|d| d.op.can_id).collect();
        assert_eq!(ids, vec![6, 7, 8, 9]);

        scheduler.clear_dispatched();
        assert_eq!(scheduler.dispatch_count(), 0);
        assert!(scheduler.dispatched().is_empty());
    }

    #[test]
    fn test_fail_open() {
        let scheduler = MockScheduler::new();
        scheduler.set_fail_open(true);
        assert!(scheduler.open().is_err());
        scheduler.set_fail_open(false);
        assert!(scheduler.open().is_ok());
    }
}

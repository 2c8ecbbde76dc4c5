//! Scheduling endpoint abstraction
//!
//! One endpoint per bridged connection. The endpoint is not bound to an
//! interface: every dispatch names its target interface index, and every
//! delivery reports the interface it came from.

use async_trait::async_trait;

use crate::bcm::{BcmDelivery, BcmOperation};
use crate::error::BcmError;

/// Kernel-side CAN scheduler (the BCM socket, or a mock in tests)
#[async_trait]
pub trait SchedulingEndpoint: Send + Sync {
    /// Hand one operation to the scheduler without waiting for it to act.
    fn dispatch(&self, ifindex: u32, op: &BcmOperation) -> Result<(), BcmError>;

    /// Wait for the next delivery. Cancel safe.
    async fn recv(&self) -> Result<BcmDelivery, BcmError>;
}

/// Opens a fresh endpoint for each connection entering bridge mode
pub trait EndpointFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn SchedulingEndpoint>, BcmError>;
}

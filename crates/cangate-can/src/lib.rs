//! cangate-can - SocketCAN plumbing for the cangate gateway
//!
//! This crate talks to the Linux CAN stack on behalf of the protocol engine.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    cangated connection                     │
//! │                                                            │
//! │  BcmOperation ──► SchedulingEndpoint ──► BcmDelivery       │
//! │                   (BcmSocket / Mock)                       │
//! │                                                            │
//! │  bus name ◄──► InterfaceResolver ◄──► interface index      │
//! │                                                            │
//! │  BitTiming / ControlMode ──► ConfigBridge (netlink)        │
//! │  bus name ──► SysfsCounters (traffic statistics)           │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod bcm;
pub mod config_bridge;
pub mod endpoint;
pub mod error;
pub mod mock;
pub mod resolver;
pub mod sysfs;

#[cfg(target_os = "linux")]
pub mod socket;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod netlink;

pub use bcm::{BcmDelivery, BcmFlags, BcmOpcode, BcmOperation, CAN_EFF_FLAG};
pub use config_bridge::{ConfigBridge, ConfigRequest, LoggingConfigBridge};
pub use endpoint::{EndpointFactory, SchedulingEndpoint};
pub use error::{BcmError, ConfigBridgeError};
pub use mock::{Dispatched, MockScheduler};
pub use resolver::{InterfaceResolver, StaticResolver, SystemResolver};
pub use sysfs::{InterfaceCounters, SysfsCounters};

#[cfg(target_os = "linux")]
pub use socket::{BcmEndpointFactory, BcmSocket};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use netlink::NetlinkConfigBridge;

//! cangated - CAN bus gateway daemon
//!
//! Exposes local CAN interfaces to TCP clients speaking the `< ... >` ASCII
//! protocol. Each client opens one authorized bus, then sends frames,
//! installs cyclic jobs and receive filters, and receives the matching
//! traffic. Scheduling is delegated to the kernel broadcast manager.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            cangated                              │
//! │                                                                  │
//! │  ConnectionManager ──► Connection (one task per client)          │
//! │                         │   FrameAssembler + parse_frame         │
//! │                         │   BcmJobTranslator ──► BCM endpoint    │
//! │                         │   encode_frame ◄────── deliveries      │
//! │                         │                                        │
//! │                         ├──► ConfigBridge (bit timing, mode)     │
//! │                         └──► StatisticsService (sysfs counters)  │
//! │                                                                  │
//! │  BeaconService ──► UDP broadcast every 2 s                       │
//! │                                                                  │
//! │  GatewayContext: BusRegistry + collaborators, shared read-only   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod beacon;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod registry;
pub mod server;
pub mod statistics;
pub mod translator;

pub use beacon::{beacon_payload, BeaconService};
pub use config::{DaemonConfig, EndpointKind};
pub use connection::{Connection, ConnectionState};
pub use context::GatewayContext;
pub use error::{ConfigError, GatewayError};
pub use registry::BusRegistry;
pub use server::ConnectionManager;
pub use statistics::{BusStatistics, StatisticsHandle, StatisticsService};
pub use translator::{plan, BcmJobTranslator, BcmWork, IdSpace, IdSweep};

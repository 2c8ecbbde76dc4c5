//! CAN layer errors

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BcmError {
    #[error("Failed to open BCM socket: {0}")]
    Open(#[source] io::Error),

    #[error("Failed to connect BCM socket: {0}")]
    Connect(#[source] io::Error),

    #[error("Send failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("Truncated BCM message ({0} bytes)")]
    Truncated(usize),

    #[error("Unknown BCM opcode {0}")]
    UnknownOpcode(u32),

    #[error("Endpoint closed")]
    Closed,

    #[error("BCM not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error, Clone)]
pub enum ConfigBridgeError {
    #[error("Interface {bus}: {reason}")]
    Interface { bus: String, reason: String },

    #[error("Not supported: {0}")]
    Unsupported(String),
}

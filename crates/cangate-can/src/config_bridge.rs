//! Bus configuration (bit timing, controller mode)

use cangate_proto::{BitTiming, ControlMode};
use parking_lot::Mutex;

use crate::error::ConfigBridgeError;

/// Driver-level interface configuration
///
/// Calls are short and synchronous; the request is applied before returning.
pub trait ConfigBridge: Send + Sync {
    fn set_bit_timing(&self, bus: &str, timing: &BitTiming) -> Result<(), ConfigBridgeError>;
    fn set_control_mode(&self, bus: &str, mode: &ControlMode) -> Result<(), ConfigBridgeError>;
}

/// A configuration request as seen by [`LoggingConfigBridge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRequest {
    BitTiming { bus: String, timing: BitTiming },
    ControlMode { bus: String, mode: ControlMode },
}

/// Logs and records requests without touching any interface
#[derive(Debug, Default)]
pub struct LoggingConfigBridge {
    requests: Mutex<Vec<ConfigRequest>>,
}

impl LoggingConfigBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ConfigRequest> {
        self.requests.lock().clone()
    }
}

impl ConfigBridge for LoggingConfigBridge {
    fn set_bit_timing(&self, bus: &str, timing: &BitTiming) -> Result<(), ConfigBridgeError> {
        tracing::info!(bus, ?timing, "Bit timing request (not applied)");
        self.requests.lock().push(ConfigRequest::BitTiming {
            bus: bus.to_string(),
            timing: *timing,
        });
        Ok(())
    }

    fn set_control_mode(&self, bus: &str, mode: &ControlMode) -> Result<(), ConfigBridgeError> {
        tracing::info!(bus, ?mode, "Control mode request (not applied)");
        self.requests.lock().push(ConfigRequest::ControlMode {
            bus: bus.to_string(),
            mode: *mode,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_logging_bridge_records_in_order() {
        let bridge = LoggingConfigBridge::new();
        let timing = BitTiming {
            bitrate: 500_000,
            sample_point: 875,
            ..Default::default()
        };
        let mode = ControlMode {
            listen_only: true,
            ..Default::default()
        };

        bridge.set_bit_timing("can0", &timing).unwrap();
        bridge.set_control_mode("can0", &mode).unwrap();

        assert_eq!(
            bridge.requests(),
            vec![
                ConfigRequest::BitTiming {
                    bus: "can0".into(),
                    timing
                },
                ConfigRequest::ControlMode {
                    bus: "can0".into(),
                    mode
                },
            ]
        );
    }
}

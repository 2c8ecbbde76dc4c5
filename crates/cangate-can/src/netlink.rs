//! Netlink-backed [`ConfigBridge`]
//!
//! Uses the `socketcan` crate's rtnetlink interface. The interface is taken
//! down for the change and brought back up afterwards, like `ip link set`.
//! Requires CAP_NET_ADMIN.

use std::fmt::Display;

use cangate_proto::{BitTiming, ControlMode};
use socketcan::nl::{CanCtrlMode, CanInterface};

use crate::config_bridge::ConfigBridge;
use crate::error::ConfigBridgeError;

#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkConfigBridge;

impl NetlinkConfigBridge {
    fn open(bus: &str) -> Result<CanInterface, ConfigBridgeError> {
        CanInterface::open(bus).map_err(|e| interface_error(bus, e))
    }

    /// Run `change` with the interface down, restarting it in every case
    fn while_down<F>(bus: &str, change: F) -> Result<(), ConfigBridgeError>
    where
        F: FnOnce(&CanInterface) -> Result<(), ConfigBridgeError>,
    {
        let iface = Self::open(bus)?;
        iface.bring_down().map_err(|e| interface_error(bus, e))?;
        let result = change(&iface);
        iface.bring_up().map_err(|e| interface_error(bus, e))?;
        result
    }
}

fn interface_error(bus: &str, e: impl Display) -> ConfigBridgeError {
    ConfigBridgeError::Interface {
        bus: bus.to_string(),
        reason: e.to_string(),
    }
}

impl ConfigBridge for NetlinkConfigBridge {
    fn set_bit_timing(&self, bus: &str, timing: &BitTiming) -> Result<(), ConfigBridgeError> {
        if timing.tq != 0
            || timing.prop_seg != 0
            || timing.phase_seg1 != 0
            || timing.phase_seg2 != 0
            || timing.sjw != 0
            || timing.brp != 0
        {
            tracing::warn!(
                bus,
                ?timing,
                "Explicit segment timing not supported, applying bitrate and sample point only"
            );
        }

        let sample_point = (timing.sample_point != 0).then_some(timing.sample_point);
        Self::while_down(bus, |iface| {
            iface
                .set_bitrate(timing.bitrate, sample_point)
                .map_err(|e| interface_error(bus, e))
        })?;

        tracing::info!(bus, bitrate = timing.bitrate, "Bit timing applied");
        Ok(())
    }

    fn set_control_mode(&self, bus: &str, mode: &ControlMode) -> Result<(), ConfigBridgeError> {
        Self::while_down(bus, |iface| {
            for (flag, on) in [
                (CanCtrlMode::ListenOnly, mode.listen_only),
                (CanCtrlMode::Loopback, mode.loopback),
                (CanCtrlMode::TripleSampling, mode.triple_sampling),
            ] {
                iface
                    .set_ctrlmode(flag, on)
                    .map_err(|e| interface_error(bus, e))?;
            }
            Ok(())
        })?;

        tracing::info!(bus, ?mode, "Control mode applied");
        Ok(())
    }
}

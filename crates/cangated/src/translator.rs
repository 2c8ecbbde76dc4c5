//! Command to BCM translation
//!
//! | Command          | opcode    | flags                    |
//! |------------------|-----------|--------------------------|
//! | SendFrame        | TX_SEND   | -                        |
//! | AddCyclicJob     | TX_SETUP  | SETTIMER, STARTTIMER     |
//! | UpdateCyclicJob  | TX_SETUP  | -                        |
//! | DeleteCyclicJob  | TX_DELETE | -                        |
//! | AddReceiveFilter | RX_SETUP  | SETTIMER                 |
//! | AddIdFilter      | RX_SETUP  | RX_FILTER_ID, SETTIMER   |
//! | DeleteFilter     | RX_DELETE | -                        |
//!
//! Wildcard filter ids expand to one dispatch per id. The expansion runs as
//! an [`IdSweep`] in bounded chunks so one client asking for every extended
//! id does not monopolize its connection; the connection loop calls
//! [`BcmJobTranslator::run_pending`] between waits.
//!
//! The bus name is resolved to an interface index right before every
//! dispatch. An unresolvable bus drops that one operation.

use std::collections::VecDeque;
use std::sync::Arc;

use cangate_can::{
    BcmFlags, BcmOpcode, BcmOperation, InterfaceResolver, SchedulingEndpoint, CAN_EFF_FLAG,
};
use cangate_proto::{Command, FilterId};

use crate::context::GatewayContext;

/// Number of standard (11-bit) ids
pub const STANDARD_ID_SPACE: u32 = 0x800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    Standard,
    Extended,
}

/// One operation repeated across an id space, in id order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdSweep {
    bus: String,
    template: BcmOperation,
    space: IdSpace,
    next: u32,
    end: u32,
}

impl IdSweep {
    pub fn new(bus: String, template: BcmOperation, space: IdSpace, extended_limit: u32) -> Self {
        let end = match space {
            IdSpace::Standard => STANDARD_ID_SPACE,
            IdSpace::Extended => extended_limit,
        };
        Self {
            bus,
            template,
            space,
            next: 0,
            end,
        }
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }

    pub fn space(&self) -> IdSpace {
        self.space
    }

    pub fn remaining(&self) -> u32 {
        self.end - self.next
    }

    fn next_op(&mut self) -> Option<BcmOperation> {
        if self.next >= self.end {
            return None;
        }
        let can_id = match self.space {
            IdSpace::Standard => self.next,
            IdSpace::Extended => self.next | CAN_EFF_FLAG,
        };
        self.next += 1;
        Some(self.template.retarget(can_id))
    }
}

/// BCM work derived from one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BcmWork {
    Single { bus: String, op: BcmOperation },
    Sweep(IdSweep),
}

impl BcmWork {
    fn is_sweep_of(&self, bus: &str, space: IdSpace) -> bool {
        matches!(self, BcmWork::Sweep(s) if s.bus == bus && s.space == space)
    }
}

fn filter_work(bus: &str, template: BcmOperation, id: FilterId, extended_limit: u32) -> BcmWork {
    match id {
        FilterId::Single(id) => BcmWork::Single {
            bus: bus.to_string(),
            op: template.retarget(id),
        },
        FilterId::AllStandard => BcmWork::Sweep(IdSweep::new(
            bus.to_string(),
            template,
            IdSpace::Standard,
            extended_limit,
        )),
        FilterId::AllExtended => BcmWork::Sweep(IdSweep::new(
            bus.to_string(),
            template,
            IdSpace::Extended,
            extended_limit,
        )),
    }
}

/// Map a command to its BCM work; `None` for commands handled elsewhere
pub fn plan(cmd: &Command, extended_limit: u32) -> Option<BcmWork> {
    let single = |bus: &str, op: BcmOperation| {
        Some(BcmWork::Single {
            bus: bus.to_string(),
            op,
        })
    };

    match cmd {
        Command::SendFrame { bus, frame } => single(
            bus,
            BcmOperation::new(BcmOpcode::TxSend, BcmFlags::NONE, frame.id).with_frame(frame),
        ),
        Command::AddCyclicJob {
            bus,
            interval,
            frame,
        } => single(
            bus,
            BcmOperation::new(
                BcmOpcode::TxSetup,
                BcmFlags::SET_TIMER | BcmFlags::START_TIMER,
                frame.id,
            )
            .with_interval(*interval)
            .with_frame(frame),
        ),
        Command::UpdateCyclicJob { bus, frame } => single(
            bus,
            BcmOperation::new(BcmOpcode::TxSetup, BcmFlags::NONE, frame.id).with_frame(frame),
        ),
        Command::DeleteCyclicJob { bus, id } => single(
            bus,
            BcmOperation::new(BcmOpcode::TxDelete, BcmFlags::NONE, *id),
        ),
        Command::AddReceiveFilter {
            bus,
            interval,
            frame,
        } => single(
            bus,
            BcmOperation::new(BcmOpcode::RxSetup, BcmFlags::SET_TIMER, frame.id)
                .with_interval(*interval)
                .with_frame(frame),
        ),
        Command::AddIdFilter { bus, interval, id } => {
            let template = BcmOperation::new(
                BcmOpcode::RxSetup,
                BcmFlags::RX_FILTER_ID | BcmFlags::SET_TIMER,
                0,
            )
            .with_interval(*interval);
            Some(filter_work(bus, template, *id, extended_limit))
        }
        Command::DeleteFilter { bus, id } => {
            let template = BcmOperation::new(BcmOpcode::RxDelete, BcmFlags::NONE, 0);
            Some(filter_work(bus, template, *id, extended_limit))
        }
        Command::OpenBus { .. }
        | Command::SetBitrate { .. }
        | Command::SetControlMode { .. }
        | Command::SetStatistics { .. } => None,
    }
}

fn dispatch(
    resolver: &dyn InterfaceResolver,
    endpoint: &dyn SchedulingEndpoint,
    bus: &str,
    op: &BcmOperation,
) {
    let Some(ifindex) = resolver.index_of(bus) else {
        tracing::debug!(bus, can_id = op.can_id, "Interface not found, operation dropped");
        return;
    };

    match endpoint.dispatch(ifindex, op) {
        Ok(()) => tracing::trace!(bus, ifindex, opcode = ?op.opcode, can_id = op.can_id, "Dispatched"),
        Err(e) => tracing::warn!(
            bus,
            opcode = ?op.opcode,
            can_id = %format!("{:X}", op.can_id),
            error = %e,
            "BCM dispatch failed"
        ),
    }
}

/// Per-connection translator holding queued BCM work
pub struct BcmJobTranslator {
    ctx: Arc<GatewayContext>,
    pending: VecDeque<BcmWork>,
}

impl BcmJobTranslator {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            pending: VecDeque::new(),
        }
    }

    /// Act on one bridge-mode command
    ///
    /// Single operations are dispatched at once unless earlier work is still
    /// queued, in which case they wait their turn.
    pub fn submit(&mut self, endpoint: &dyn SchedulingEndpoint, cmd: Command) {
        if let Command::OpenBus { bus } = &cmd {
            tracing::debug!(bus = %bus, "Already bridged, open ignored");
            return;
        }

        let bus = cmd.bus();
        if !self.ctx.registry.contains(bus) {
            tracing::warn!(bus, command = ?cmd.code(), "Bus not authorized, command ignored");
            return;
        }

        match &cmd {
            Command::SetBitrate { bus, timing } => {
                if let Err(e) = self.ctx.config_bridge.set_bit_timing(bus, timing) {
                    tracing::warn!(bus = %bus, error = %e, "Failed to set bit timing");
                }
            }
            Command::SetControlMode { bus, mode } => {
                if let Err(e) = self.ctx.config_bridge.set_control_mode(bus, mode) {
                    tracing::warn!(bus = %bus, error = %e, "Failed to set control mode");
                }
            }
            Command::SetStatistics { bus, enabled } => {
                self.ctx.statistics.set_enabled(bus, *enabled);
            }
            _ => {
                if let Some(work) = plan(&cmd, self.ctx.wildcard.extended_limit) {
                    self.enqueue(endpoint, work);
                }
            }
        }
    }

    fn enqueue(&mut self, endpoint: &dyn SchedulingEndpoint, work: BcmWork) {
        match work {
            BcmWork::Single { bus, op } if self.pending.is_empty() => {
                dispatch(&*self.ctx.resolver, endpoint, &bus, &op);
            }
            BcmWork::Sweep(sweep) => {
                // Only a trailing sweep may be replaced; earlier ones have work queued behind them
                if self
                    .pending
                    .back()
                    .is_some_and(|w| w.is_sweep_of(&sweep.bus, sweep.space))
                {
                    self.pending.pop_back();
                    tracing::debug!(bus = %sweep.bus, space = ?sweep.space, "Pending sweep superseded");
                }
                tracing::info!(
                    bus = %sweep.bus,
                    space = ?sweep.space,
                    opcode = ?sweep.template.opcode,
                    ids = sweep.remaining(),
                    "Wildcard sweep queued"
                );
                self.pending.push_back(BcmWork::Sweep(sweep));
            }
            single => self.pending.push_back(single),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Dispatches still queued, sweeps included
    pub fn pending_dispatches(&self) -> u64 {
        self.pending
            .iter()
            .map(|w| match w {
                BcmWork::Single { .. } => 1,
                BcmWork::Sweep(s) => u64::from(s.remaining()),
            })
            .sum()
    }

    /// Issue up to one chunk of queued dispatches; returns how many were issued
    pub fn run_pending(&mut self, endpoint: &dyn SchedulingEndpoint) -> usize {
        let budget = self.ctx.wildcard.sweep_chunk.max(1);
        let resolver = &*self.ctx.resolver;
        let mut issued = 0;

        while issued < budget {
            let Some(front) = self.pending.front_mut() else {
                break;
            };
            match front {
                BcmWork::Single { bus, op } => {
                    dispatch(resolver, endpoint, bus, op);
                    issued += 1;
                    self.pending.pop_front();
                }
                BcmWork::Sweep(sweep) => {
                    while issued < budget {
                        let Some(op) = sweep.next_op() else { break };
                        dispatch(resolver, endpoint, &sweep.bus, &op);
                        issued += 1;
                    }
                    if sweep.remaining() == 0 {
                        tracing::info!(bus = %sweep.bus, space = ?sweep.space, "Wildcard sweep complete");
                        self.pending.pop_front();
                    }
                }
            }
        }

        issued
    }

    /// Drop all queued work
    pub fn cancel(&mut self) {
        if self.has_pending() {
            tracing::info!(
                dispatches = self.pending_dispatches(),
                "Cancelling queued BCM work"
            );
            self.pending.clear();
        }
    }
}

impl Drop for BcmJobTranslator {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! Broadcast manager (BCM) message model
//!
//! Mirrors `linux/can/bcm.h`. Every operation carries exactly one frame;
//! the kernel schedules cyclic transmission and receive filtering.
//!
//! References:
//!    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-protocol-sockets-sock-dgram

use std::mem::{offset_of, size_of};
use std::ops::BitOr;

use cangate_proto::{CanData, InboundFrame, Interval};
use libc::c_long;

use crate::error::BcmError;

/// Extended frame format flag in the CAN id
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;

/// Valid bits of a standard id
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;

/// Valid bits of an extended id
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BcmOpcode {
    TxSetup = 1,
    TxDelete = 2,
    TxRead = 3,
    TxSend = 4,
    RxSetup = 5,
    RxDelete = 6,
    RxRead = 7,
    TxStatus = 8,
    TxExpired = 9,
    RxStatus = 10,
    RxTimeout = 11,
    RxChanged = 12,
}

impl TryFrom<u32> for BcmOpcode {
    type Error = BcmError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => BcmOpcode::TxSetup,
            2 => BcmOpcode::TxDelete,
            3 => BcmOpcode::TxRead,
            4 => BcmOpcode::TxSend,
            5 => BcmOpcode::RxSetup,
            6 => BcmOpcode::RxDelete,
            7 => BcmOpcode::RxRead,
            8 => BcmOpcode::TxStatus,
            9 => BcmOpcode::TxExpired,
            10 => BcmOpcode::RxStatus,
            11 => BcmOpcode::RxTimeout,
            12 => BcmOpcode::RxChanged,
            other => return Err(BcmError::UnknownOpcode(other)),
        })
    }
}

/// `bcm_msg_head.flags`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BcmFlags(u32);

impl BcmFlags {
    pub const NONE: BcmFlags = BcmFlags(0);
    pub const SET_TIMER: BcmFlags = BcmFlags(0x0001);
    pub const START_TIMER: BcmFlags = BcmFlags(0x0002);
    pub const RX_FILTER_ID: BcmFlags = BcmFlags(0x0020);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: BcmFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BcmFlags {
    type Output = BcmFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BcmFlags(self.0 | rhs.0)
    }
}

/// One BCM request, built per dispatch and then discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcmOperation {
    pub opcode: BcmOpcode,
    pub flags: BcmFlags,
    /// Goes to `ival2`: transmit period or receive timeout
    pub interval: Interval,
    pub can_id: u32,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl BcmOperation {
    pub fn new(opcode: BcmOpcode, flags: BcmFlags, can_id: u32) -> Self {
        Self {
            opcode,
            flags,
            interval: Interval::default(),
            can_id,
            dlc: 0,
            data: [0; 8],
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Take id and payload from a parsed frame
    pub fn with_frame(mut self, frame: &CanData) -> Self {
        self.can_id = frame.id;
        self.dlc = frame.dlc();
        self.data = frame.raw_data();
        self
    }

    /// Same operation aimed at another id
    pub fn retarget(&self, can_id: u32) -> Self {
        Self { can_id, ..*self }
    }

    pub(crate) fn to_raw(self) -> BcmMessage {
        BcmMessage {
            head: BcmMsgHead {
                opcode: self.opcode as u32,
                flags: self.flags.bits(),
                count: 0,
                ival1: BcmTimeval::default(),
                ival2: BcmTimeval {
                    tv_sec: saturating_long(self.interval.secs),
                    tv_usec: saturating_long(self.interval.usecs),
                },
                can_id: self.can_id,
                nframes: 1,
            },
            frame: RawCanFrame {
                can_id: self.can_id,
                len: self.dlc,
                pad: 0,
                res0: 0,
                len8_dlc: 0,
                data: self.data,
            },
        }
    }
}

fn saturating_long(value: u64) -> c_long {
    c_long::try_from(value).unwrap_or(c_long::MAX)
}

/// A message read back from the BCM socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BcmDelivery {
    /// Interface the traffic was seen on
    pub ifindex: u32,
    pub opcode: BcmOpcode,
    /// `bcm_msg_head.can_id`, flag bits included
    pub can_id: u32,
    /// Absent for notifications such as RX timeouts
    pub frame: Option<InboundFrame>,
}

impl BcmDelivery {
    /// Decode a raw `bcm_msg_head` plus optional first frame
    pub fn decode(ifindex: u32, bytes: &[u8]) -> Result<Self, BcmError> {
        if bytes.len() < size_of::<BcmMsgHead>() {
            return Err(BcmError::Truncated(bytes.len()));
        }

        // SAFETY: length checked above; every bit pattern is a valid BcmMsgHead
        let head: BcmMsgHead =
            unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const BcmMsgHead) };
        let opcode = BcmOpcode::try_from(head.opcode)?;

        let frame_offset = offset_of!(BcmMessage, frame);
        let frame = if head.nframes > 0 && bytes.len() >= frame_offset + size_of::<RawCanFrame>()
        {
            // SAFETY: length checked above; every bit pattern is a valid RawCanFrame
            let raw: RawCanFrame = unsafe {
                std::ptr::read_unaligned(bytes[frame_offset..].as_ptr() as *const RawCanFrame)
            };
            Some(InboundFrame::new(head.can_id, raw.len, raw.data))
        } else {
            None
        };

        Ok(Self {
            ifindex,
            opcode,
            can_id: head.can_id,
            frame,
        })
    }

    /// The frame to report to a client, if this delivery is one
    ///
    /// Content changes carry their frame. A receive timeout becomes an
    /// empty frame for the watched id. Status replies are not traffic.
    pub fn to_inbound(&self) -> Option<InboundFrame> {
        match self.opcode {
            BcmOpcode::RxChanged => self.frame,
            BcmOpcode::RxTimeout => Some(InboundFrame::new(self.can_id, 0, [0; 8])),
            _ => None,
        }
    }
}

// Kernel ABI structures

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BcmTimeval {
    pub tv_sec: c_long,
    pub tv_usec: c_long,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct BcmMsgHead {
    pub opcode: u32,
    pub flags: u32,
    pub count: u32,
    pub ival1: BcmTimeval,
    pub ival2: BcmTimeval,
    pub can_id: u32,
    pub nframes: u32,
}

#[repr(C, align(8))]
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawCanFrame {
    pub can_id: u32,
    pub len: u8,
    pub pad: u8,
    pub res0: u8,
    pub len8_dlc: u8,
    pub data: [u8; 8],
}

/// `bcm_msg_head` followed by one `can_frame`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct BcmMessage {
    pub head: BcmMsgHead,
    pub frame: RawCanFrame,
}

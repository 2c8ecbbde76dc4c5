//! Encoding of bus traffic into wire messages
//!
//! ```text
//! < can0 f 123 2 AA BB >\0      data frame
//! < can0 e 20000004 00 .. >\0   error frame (always 8 data bytes)
//! ```
//!
//! The trailing NUL is kept for clients that split the stream on NUL
//! instead of on the closing marker.

use std::fmt::Write;

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::MAX_DLC;
use crate::error::EncodeError;

/// Error frame flag in the CAN id
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Payload length of every error frame
pub const CAN_ERR_DLC: u8 = 8;

/// A frame delivered by the bus, as handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundFrame {
    /// Raw CAN id, flag bits included
    pub id: u32,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl InboundFrame {
    pub fn new(id: u32, dlc: u8, data: [u8; 8]) -> Self {
        Self { id, dlc, data }
    }

    pub fn is_error_frame(&self) -> bool {
        self.id & CAN_ERR_FLAG != 0
    }
}

/// Encode a delivery from interface `ifname` into one wire message
pub fn encode_frame(ifname: &str, frame: &InboundFrame) -> Result<Bytes, EncodeError> {
    let mut out = BytesMut::with_capacity(64);

    if frame.is_error_frame() {
        if frame.dlc != CAN_ERR_DLC {
            return Err(EncodeError::ErrorFrameDlc(frame.dlc));
        }
        // Writing into BytesMut cannot fail
        let _ = write!(out, "< {} e {:03X} ", ifname, frame.id);
    } else {
        if frame.dlc > MAX_DLC {
            return Err(EncodeError::DlcOutOfRange(frame.dlc));
        }
        let _ = write!(out, "< {} f {:03X} {} ", ifname, frame.id, frame.dlc);
    }

    for byte in &frame.data[..frame.dlc as usize] {
        let _ = write!(out, "{:02X} ", byte);
    }

    out.put_u8(b'>');
    out.put_u8(0);

    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_data_frame() {
        let frame = InboundFrame::new(0x123, 2, [0xAA, 0xBB, 0, 0, 0, 0, 0, 0]);
        let wire = encode_frame("can0", &frame).unwrap();
        assert_eq!(&wire[..], b"< can0 f 123 2 AA BB >\0");
    }

    #[test]
    fn test_encode_pads_short_ids() {
        let frame = InboundFrame::new(0x5, 1, [0x0F, 0, 0, 0, 0, 0, 0, 0]);
        let wire = encode_frame("vcan0", &frame).unwrap();
        assert_eq!(&wire[..], b"< vcan0 f 005 1 0F >\0");
    }

    #[test]
    fn test_encode_empty_frame() {
        let frame = InboundFrame::new(0x200, 0, [0; 8]);
        let wire = encode_frame("can0", &frame).unwrap();
        assert_eq!(&wire[..], b"< can0 f 200 0 >\0");
    }

    #[test]
    fn test_encode_error_frame() {
        let frame = InboundFrame::new(CAN_ERR_FLAG | 0x04, 8, [0, 0x10, 0, 0, 0, 0, 0, 0]);
        let wire = encode_frame("can0", &frame).unwrap();
        assert_eq!(
            &wire[..],
            b"< can0 e 20000004 00 10 00 00 00 00 00 00 >\0"
        );
    }

    #[test]
    fn test_error_frame_with_wrong_dlc_is_dropped() {
        let frame = InboundFrame::new(CAN_ERR_FLAG | 0x04, 6, [0; 8]);
        assert_eq!(
            encode_frame("can0", &frame),
            Err(EncodeError::ErrorFrameDlc(6))
        );
    }

    #[test]
    fn test_oversized_dlc_is_dropped() {
        let frame = InboundFrame::new(0x123, 9, [0; 8]);
        assert_eq!(
            encode_frame("can0", &frame),
            Err(EncodeError::DlcOutOfRange(9))
        );
    }
}

//! cangate-proto - ASCII wire protocol for the cangate gateway
//!
//! Pure protocol layer with no I/O: turns the client byte stream into typed
//! commands and turns bus deliveries back into wire messages.
//!
//! # Wire format
//!
//! Every wire frame is delimited by `<` and `>` with space-separated fields:
//!
//! ```text
//! server → client   <hi>
//! client → server   <open can0>
//! client → server   < can0 S 123 2 AA BB >
//! server → client   < can0 f 123 2 AA BB >\0
//! ```
//!
//! # Example
//!
//! ```rust
//! use cangate_proto::{parse_frame, Command, FrameAssembler};
//!
//! let mut assembler = FrameAssembler::new(4000);
//! let frames = assembler.feed(b"noise< can0 D 200 >");
//! assert_eq!(frames.len(), 1);
//!
//! let command = parse_frame(&frames[0]).unwrap();
//! assert_eq!(command, Command::DeleteCyclicJob { bus: "can0".into(), id: 0x200 });
//! ```

pub mod command;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod parser;

pub use command::{
    BitTiming, CanData, Command, ControlMode, FilterId, Interval, ALL_EXTENDED_IDS,
    ALL_STANDARD_IDS, MAX_BUS_NAME_LEN, MAX_DLC, MAX_INTERVAL_FIELD,
};
pub use encoder::{encode_frame, InboundFrame, CAN_ERR_DLC, CAN_ERR_FLAG};
pub use error::{EncodeError, SyntaxError};
pub use frame::{FrameAssembler, DEFAULT_MAX_FRAME_LEN};
pub use parser::parse_frame;

/// Greeting sent once when a client enters the no-bus state
pub const GREETING: &[u8] = b"<hi>";

/// The only structured error reply on the wire
pub const OPEN_ERROR: &[u8] = b"<error could not open bus>";

//! Typed commands decoded from client wire frames

/// Maximum number of data bytes in a classic CAN frame
pub const MAX_DLC: u8 = 8;

/// Maximum length of the bus name token in bridge commands
pub const MAX_BUS_NAME_LEN: usize = 6;

/// Largest seconds or microseconds value in an interval; fits a 32-bit C `long`
pub const MAX_INTERVAL_FIELD: u64 = i32::MAX as u64;

/// Wire id meaning "every standard (11-bit) id"
pub const ALL_STANDARD_IDS: u32 = 0xFFFF_FFFE;

/// Wire id meaning "every extended (29-bit) id"
pub const ALL_EXTENDED_IDS: u32 = 0xFFFF_FFFF;

/// CAN id plus up to eight payload bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanData {
    /// Raw CAN id, flag bits included
    pub id: u32,
    dlc: u8,
    data: [u8; 8],
}

impl CanData {
    /// Build from an id and payload. Returns `None` for payloads over 8 bytes.
    pub fn new(id: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_DLC as usize {
            return None;
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            dlc: payload.len() as u8,
            data,
        })
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// The valid payload bytes (`dlc` of them)
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// All eight data bytes, zero padded
    pub fn raw_data(&self) -> [u8; 8] {
        self.data
    }
}

/// Timer interval as sent on the wire (`SEC USEC`)
///
/// Kept as the raw pair so it reaches the kernel unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub secs: u64,
    pub usecs: u64,
}

impl Interval {
    pub fn new(secs: u64, usecs: u64) -> Self {
        Self { secs, usecs }
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.usecs == 0
    }
}

/// Target of an id filter command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterId {
    Single(u32),
    /// Expands to one registration per standard id
    AllStandard,
    /// Expands to one registration per extended id
    AllExtended,
}

impl From<u32> for FilterId {
    fn from(id: u32) -> Self {
        match id {
            ALL_STANDARD_IDS => FilterId::AllStandard,
            ALL_EXTENDED_IDS => FilterId::AllExtended,
            id => FilterId::Single(id),
        }
    }
}

/// Bit timing parameters, all hexadecimal on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitTiming {
    pub bitrate: u32,
    pub sample_point: u32,
    pub tq: u32,
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub brp: u32,
}

/// Controller mode flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlMode {
    pub listen_only: bool,
    pub loopback: bool,
    pub triple_sampling: bool,
}

/// A decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `<open BUS>`
    OpenBus { bus: String },
    /// `S`: transmit once
    SendFrame { bus: String, frame: CanData },
    /// `A`: start a cyclic transmit job
    AddCyclicJob {
        bus: String,
        interval: Interval,
        frame: CanData,
    },
    /// `U`: replace a cyclic job's payload
    UpdateCyclicJob { bus: String, frame: CanData },
    /// `D`: remove a cyclic job
    DeleteCyclicJob { bus: String, id: u32 },
    /// `R`: content-matching receive filter with timeout
    AddReceiveFilter {
        bus: String,
        interval: Interval,
        frame: CanData,
    },
    /// `F`: id-only receive filter
    AddIdFilter {
        bus: String,
        interval: Interval,
        id: FilterId,
    },
    /// `X`: remove a receive filter
    DeleteFilter { bus: String, id: FilterId },
    /// `B`: bit timing
    SetBitrate { bus: String, timing: BitTiming },
    /// `C`: controller mode
    SetControlMode { bus: String, mode: ControlMode },
    /// `E`: traffic statistics on/off
    SetStatistics { bus: String, enabled: bool },
}

impl Command {
    /// Bus the command targets
    pub fn bus(&self) -> &str {
        match self {
            Command::OpenBus { bus }
            | Command::SendFrame { bus, .. }
            | Command::AddCyclicJob { bus, .. }
            | Command::UpdateCyclicJob { bus, .. }
            | Command::DeleteCyclicJob { bus, .. }
            | Command::AddReceiveFilter { bus, .. }
            | Command::AddIdFilter { bus, .. }
            | Command::DeleteFilter { bus, .. }
            | Command::SetBitrate { bus, .. }
            | Command::SetControlMode { bus, .. }
            | Command::SetStatistics { bus, .. } => bus,
        }
    }

    /// Single-letter wire code, `None` for the open handshake
    pub fn code(&self) -> Option<char> {
        match self {
            Command::OpenBus { .. } => None,
            Command::SendFrame { .. } => Some('S'),
            Command::AddCyclicJob { .. } => Some('A'),
            Command::UpdateCyclicJob { .. } => Some('U'),
            Command::DeleteCyclicJob { .. } => Some('D'),
            Command::AddReceiveFilter { .. } => Some('R'),
            Command::AddIdFilter { .. } => Some('F'),
            Command::DeleteFilter { .. } => Some('X'),
            Command::SetBitrate { .. } => Some('B'),
            Command::SetControlMode { .. } => Some('C'),
            Command::SetStatistics { .. } => Some('E'),
        }
    }
}

//! Command tokenizer
//!
//! Turns one complete wire frame into a [`Command`]. Fields are positional;
//! ids, bit timing values and data bytes are hexadecimal, while DLC,
//! intervals and flags are decimal.

use crate::command::{
    BitTiming, CanData, Command, ControlMode, FilterId, Interval, MAX_BUS_NAME_LEN, MAX_DLC,
    MAX_INTERVAL_FIELD,
};
use crate::error::SyntaxError;

/// Parse a complete frame, delimiters included
pub fn parse_frame(frame: &[u8]) -> Result<Command, SyntaxError> {
    let text = std::str::from_utf8(frame)
        .ok()
        .filter(|t| t.is_ascii())
        .ok_or(SyntaxError::NotAscii)?;

    let inner = text
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .ok_or(SyntaxError::Unframed)?;

    let tokens: Vec<&str> = inner.split_ascii_whitespace().collect();

    match tokens.as_slice() {
        ["open", bus] => {
            return Ok(Command::OpenBus {
                bus: (*bus).to_string(),
            })
        }
        [] | [_] => return Err(SyntaxError::MissingCommand),
        _ => {}
    }

    let bus = tokens[0];
    if bus.len() > MAX_BUS_NAME_LEN {
        return Err(SyntaxError::BusNameTooLong(bus.to_string()));
    }
    let bus = bus.to_string();

    let mut chars = tokens[1].chars();
    let code = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => return Err(SyntaxError::InvalidCommand(tokens[1].to_string())),
    };

    let fields = Fields {
        command: code,
        tokens: &tokens[2..],
    };

    match code {
        'S' => Ok(Command::SendFrame {
            bus,
            frame: fields.frame(0)?,
        }),
        'A' => Ok(Command::AddCyclicJob {
            bus,
            interval: fields.interval(0)?,
            frame: fields.frame(2)?,
        }),
        'U' => Ok(Command::UpdateCyclicJob {
            bus,
            frame: fields.frame(0)?,
        }),
        'D' => {
            fields.expect_len(1)?;
            Ok(Command::DeleteCyclicJob {
                bus,
                id: fields.hex_u32(0, "id")?,
            })
        }
        'R' => Ok(Command::AddReceiveFilter {
            bus,
            interval: fields.interval(0)?,
            frame: fields.frame(2)?,
        }),
        'F' => {
            fields.expect_len(3)?;
            Ok(Command::AddIdFilter {
                bus,
                interval: fields.interval(0)?,
                id: FilterId::from(fields.hex_u32(2, "id")?),
            })
        }
        'X' => {
            fields.expect_len(1)?;
            Ok(Command::DeleteFilter {
                bus,
                id: FilterId::from(fields.hex_u32(0, "id")?),
            })
        }
        'B' => {
            fields.expect_len(8)?;
            Ok(Command::SetBitrate {
                bus,
                timing: BitTiming {
                    bitrate: fields.hex_u32(0, "bitrate")?,
                    sample_point: fields.hex_u32(1, "sample point")?,
                    tq: fields.hex_u32(2, "tq")?,
                    prop_seg: fields.hex_u32(3, "prop_seg")?,
                    phase_seg1: fields.hex_u32(4, "phase_seg1")?,
                    phase_seg2: fields.hex_u32(5, "phase_seg2")?,
                    sjw: fields.hex_u32(6, "sjw")?,
                    brp: fields.hex_u32(7, "brp")?,
                },
            })
        }
        'C' => {
            fields.expect_len(3)?;
            Ok(Command::SetControlMode {
                bus,
                mode: ControlMode {
                    listen_only: fields.flag(0, "listen-only")?,
                    loopback: fields.flag(1, "loopback")?,
                    triple_sampling: fields.flag(2, "three-samples")?,
                },
            })
        }
        'E' => {
            fields.expect_len(1)?;
            Ok(Command::SetStatistics {
                bus,
                enabled: fields.flag(0, "enable")?,
            })
        }
        other => Err(SyntaxError::UnknownCommand(other)),
    }
}

/// Positional fields following the command code
struct Fields<'a> {
    command: char,
    tokens: &'a [&'a str],
}

impl Fields<'_> {
    fn expect_len(&self, expected: usize) -> Result<(), SyntaxError> {
        if self.tokens.len() != expected {
            return Err(SyntaxError::FieldCount {
                command: self.command,
                expected,
                found: self.tokens.len(),
            });
        }
        Ok(())
    }

    fn token(&self, idx: usize) -> Result<&str, SyntaxError> {
        self.tokens
            .get(idx)
            .copied()
            .ok_or(SyntaxError::FieldCount {
                command: self.command,
                expected: idx + 1,
                found: self.tokens.len(),
            })
    }

    fn invalid(&self, field: &'static str, value: &str) -> SyntaxError {
        SyntaxError::InvalidField {
            command: self.command,
            field,
            value: value.to_string(),
        }
    }

    fn hex_u32(&self, idx: usize, field: &'static str) -> Result<u32, SyntaxError> {
        let raw = self.token(idx)?;
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        u32::from_str_radix(digits, 16).map_err(|_| self.invalid(field, raw))
    }

    fn hex_u8(&self, idx: usize, field: &'static str) -> Result<u8, SyntaxError> {
        let raw = self.token(idx)?;
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        u8::from_str_radix(digits, 16).map_err(|_| self.invalid(field, raw))
    }

    fn dec_u64(&self, idx: usize, field: &'static str) -> Result<u64, SyntaxError> {
        let raw = self.token(idx)?;
        raw.parse().map_err(|_| self.invalid(field, raw))
    }

    fn flag(&self, idx: usize, field: &'static str) -> Result<bool, SyntaxError> {
        let raw = self.token(idx)?;
        raw.parse::<u32>()
            .map(|v| v != 0)
            .map_err(|_| self.invalid(field, raw))
    }

    fn interval(&self, idx: usize) -> Result<Interval, SyntaxError> {
        Ok(Interval::new(
            self.interval_field(idx, "seconds")?,
            self.interval_field(idx + 1, "microseconds")?,
        ))
    }

    fn interval_field(&self, idx: usize, field: &'static str) -> Result<u64, SyntaxError> {
        let value = self.dec_u64(idx, field)?;
        if value > MAX_INTERVAL_FIELD {
            return Err(self.invalid(field, self.token(idx)?));
        }
        Ok(value)
    }

    /// `ID DLC B0 .. B(DLC-1)` starting at `idx`, which must end the frame
    fn frame(&self, idx: usize) -> Result<CanData, SyntaxError> {
        let id = self.hex_u32(idx, "id")?;

        let raw_dlc = self.token(idx + 1)?;
        let dlc: u8 = raw_dlc.parse().map_err(|_| self.invalid("dlc", raw_dlc))?;
        if dlc > MAX_DLC {
            return Err(SyntaxError::DlcOutOfRange(dlc));
        }

        self.expect_len(idx + 2 + dlc as usize)?;

        let mut payload = [0u8; 8];
        for (i, byte) in payload.iter_mut().take(dlc as usize).enumerate() {
            *byte = self.hex_u8(idx + 2 + i, "data byte")?;
        }

        CanData::new(id, &payload[..dlc as usize]).ok_or(SyntaxError::DlcOutOfRange(dlc))
    }
}

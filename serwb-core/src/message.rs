//! Tunnel record opcodes and endpoint roles.
//!
//! Uses proper enums with `TryFrom`; unknown values are errors, not panics.

use std::fmt;

use crate::error::SerwbError;

// ── Opcode ───────────────────────────────────────────────────────

/// Kind of bus record carried in a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Posted write; no response.
    Write = 0x1,
    /// Read request; answered by a `ReadResponse`.
    Read = 0x2,
    /// Data returned for a read.
    ReadResponse = 0x3,
}

impl Opcode {
    /// Whether the record carries data words after the address.
    pub fn carries_data(&self) -> bool {
        matches!(self, Self::Write | Self::ReadResponse)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = SerwbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(Opcode::Write),
            0x2 => Ok(Opcode::Read),
            0x3 => Ok(Opcode::ReadResponse),
            _ => Err(SerwbError::UnknownVariant {
                type_name: "Opcode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Write => write!(f, "Write"),
            Opcode::Read => write!(f, "Read"),
            Opcode::ReadResponse => write!(f, "ReadResponse"),
        }
    }
}

// ── BusRole ──────────────────────────────────────────────────────

/// Role of an endpoint on its local bus.
///
/// A `Slave` endpoint is a bus slave locally: it accepts transactions and
/// forwards them as requests. A `Master` endpoint drives its local bus with
/// the requests it receives and returns read data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusRole {
    Master,
    Slave,
}

impl BusRole {
    /// Records this role is allowed to receive.
    pub fn accepts(&self, opcode: Opcode) -> bool {
        match self {
            BusRole::Master => matches!(opcode, Opcode::Write | Opcode::Read),
            BusRole::Slave => opcode == Opcode::ReadResponse,
        }
    }
}

impl fmt::Display for BusRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusRole::Master => write!(f, "bus-master"),
            BusRole::Slave => write!(f, "bus-slave"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_try_from() {
        assert_eq!(Opcode::try_from(1).unwrap(), Opcode::Write);
        assert_eq!(Opcode::try_from(3).unwrap(), Opcode::ReadResponse);
        assert!(matches!(
            Opcode::try_from(9),
            Err(SerwbError::UnknownVariant { type_name: "Opcode", value: 9 })
        ));
    }

    #[test]
    fn roles_accept_their_records() {
        assert!(BusRole::Master.accepts(Opcode::Read));
        assert!(!BusRole::Master.accepts(Opcode::ReadResponse));
        assert!(BusRole::Slave.accepts(Opcode::ReadResponse));
        assert!(!BusRole::Slave.accepts(Opcode::Write));
    }

    #[test]
    fn display() {
        assert_eq!(Opcode::ReadResponse.to_string(), "ReadResponse");
        assert_eq!(BusRole::Slave.to_string(), "bus-slave");
    }
}

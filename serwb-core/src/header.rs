//! Record header: the first payload word of every frame.
//!
//! ```text
//!  31            16 15    12 11     8 7          0
//! ┌────────────────┬────────┬────────┬────────────┐
//! │ magic 0x4E6F   │ opcode │   be   │   count    │
//! └────────────────┴────────┴────────┴────────────┘
//! ```

use crate::error::SerwbError;
use crate::message::Opcode;

/// Constant upper half of every record header.
pub const RECORD_MAGIC: u16 = 0x4E6F;

/// Words preceding the data in a record (header and address).
pub const RECORD_HEADER_WORDS: usize = 2;

/// Largest word count one record can carry.
pub const MAX_RECORD_WORDS: usize = 255;

/// All four byte lanes enabled.
pub const BYTE_ENABLE_ALL: u8 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader {
    pub opcode: Opcode,
    /// Byte-lane mask (bits 3..0); applies to every word of a write.
    pub byte_enable: u8,
    /// Number of words written, requested or returned (1..=255).
    pub count: u8,
}

impl RecordHeader {
    pub fn new(opcode: Opcode, byte_enable: u8, count: u8) -> Self {
        Self {
            opcode,
            byte_enable: byte_enable & 0xF,
            count,
        }
    }

    pub fn pack(&self) -> u32 {
        (RECORD_MAGIC as u32) << 16
            | (self.opcode as u32) << 12
            | ((self.byte_enable & 0xF) as u32) << 8
            | self.count as u32
    }

    pub fn unpack(word: u32) -> Result<Self, SerwbError> {
        let magic = (word >> 16) as u16;
        if magic != RECORD_MAGIC {
            return Err(SerwbError::InvalidMagic(magic));
        }
        let opcode = Opcode::try_from(((word >> 12) & 0xF) as u8)?;
        let count = (word & 0xFF) as u8;
        if count == 0 {
            return Err(SerwbError::ProtocolViolation("record with zero word count"));
        }
        Ok(Self {
            opcode,
            byte_enable: ((word >> 8) & 0xF) as u8,
            count,
        })
    }

    /// Total record length in words, header included.
    pub fn record_words(&self) -> usize {
        let data = if self.opcode.carries_data() {
            self.count as usize
        } else {
            0
        };
        RECORD_HEADER_WORDS + data
    }
}

//! Bus records carried as frame payloads.

use std::fmt;

use crate::error::SerwbError;
use crate::header::{BYTE_ENABLE_ALL, MAX_RECORD_WORDS, RECORD_HEADER_WORDS, RecordHeader};
use crate::message::Opcode;

/// One tunnelled bus operation.
///
/// Word layout: `[header, address, data...]`. Burst words sit at
/// consecutive word addresses starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: RecordHeader,
    /// Byte address of the first word.
    pub address: u32,
    pub data: Vec<u32>,
}

fn burst_count(len: usize) -> Result<u8, SerwbError> {
    if len == 0 || len > MAX_RECORD_WORDS {
        return Err(SerwbError::InvalidLength {
            length: len,
            max: MAX_RECORD_WORDS,
        });
    }
    Ok(len as u8)
}

impl Packet {
    /// Single-word write with a byte-enable mask.
    pub fn write(address: u32, value: u32, byte_enable: u8) -> Self {
        Self {
            header: RecordHeader::new(Opcode::Write, byte_enable, 1),
            address,
            data: vec![value],
        }
    }

    /// Full-word write of consecutive words.
    pub fn write_burst(address: u32, data: Vec<u32>) -> Result<Self, SerwbError> {
        let count = burst_count(data.len())?;
        Ok(Self {
            header: RecordHeader::new(Opcode::Write, BYTE_ENABLE_ALL, count),
            address,
            data,
        })
    }

    pub fn read(address: u32) -> Self {
        Self {
            header: RecordHeader::new(Opcode::Read, BYTE_ENABLE_ALL, 1),
            address,
            data: Vec::new(),
        }
    }

    pub fn read_burst(address: u32, count: usize) -> Result<Self, SerwbError> {
        let count = burst_count(count)?;
        Ok(Self {
            header: RecordHeader::new(Opcode::Read, BYTE_ENABLE_ALL, count),
            address,
            data: Vec::new(),
        })
    }

    /// Data for a read of `address`.
    pub fn read_response(address: u32, data: Vec<u32>) -> Result<Self, SerwbError> {
        let count = burst_count(data.len())?;
        Ok(Self {
            header: RecordHeader::new(Opcode::ReadResponse, BYTE_ENABLE_ALL, count),
            address,
            data,
        })
    }

    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Number of words written, requested or returned.
    pub fn count(&self) -> usize {
        self.header.count as usize
    }

    /// Length of the record on the wire, in words.
    pub fn word_len(&self) -> usize {
        self.header.record_words()
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(self.word_len());
        words.push(self.header.pack());
        words.push(self.address);
        words.extend_from_slice(&self.data);
        words
    }

    pub fn from_words(words: &[u32]) -> Result<Self, SerwbError> {
        if words.len() < RECORD_HEADER_WORDS {
            return Err(SerwbError::InvalidRecordLength {
                expected: RECORD_HEADER_WORDS,
                actual: words.len(),
            });
        }
        let header = RecordHeader::unpack(words[0])?;
        let expected = header.record_words();
        if words.len() != expected {
            return Err(SerwbError::InvalidRecordLength {
                expected,
                actual: words.len(),
            });
        }
        Ok(Self {
            header,
            address: words[1],
            data: words[RECORD_HEADER_WORDS..].to_vec(),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @{:#010x} x{} be={:#x}",
            self.header.opcode, self.address, self.header.count, self.header.byte_enable
        )
    }
}

//! Multi-lane link words.
//!
//! A [`LinkWord`] carries one byte per lane (lane 0 in the low byte) and
//! a per-lane control mask. On the line it becomes a [`RawWord`] of
//! `lanes * 10` bits with lane 0 in the most significant position, so
//! the serial order (MSB first) is lane 0 `a..j`, lane 1 `a..j`, ...

use std::fmt;

use super::{K28_5, SYMBOL_BITS, SymbolDecoder, SymbolEncoder};
use crate::error::{DecodeError, SerwbError};

/// Maximum number of lanes a link word can span.
pub const MAX_LANES: usize = 4;

// ── LinkWord ─────────────────────────────────────────────────────

/// One link-clock worth of decoded symbols.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkWord {
    /// Lane bytes, lane 0 in bits 7..0.
    pub data: u32,
    /// Control mask, bit `n` set when lane `n` carries a K-code.
    pub k: u8,
}

impl LinkWord {
    /// The reserved idle / training word: K28.5 on lane 0, D0.0 elsewhere.
    pub const COMMA: Self = Self {
        data: K28_5 as u32,
        k: 0b0001,
    };

    /// A plain data word.
    pub const fn data(data: u32) -> Self {
        Self { data, k: 0 }
    }

    /// Returns `true` if any lane carries a control symbol.
    pub fn is_control(&self) -> bool {
        self.k != 0
    }

    pub fn is_comma(&self) -> bool {
        *self == Self::COMMA
    }

    /// Byte carried on `lane`.
    pub fn lane(&self, lane: usize) -> u8 {
        (self.data >> (8 * lane)) as u8
    }
}

impl fmt::Debug for LinkWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.k == 0 {
            write!(f, "D({:#010x})", self.data)
        } else {
            write!(f, "K({:#010x}, k={:#06b})", self.data, self.k)
        }
    }
}

// ── RawWord ──────────────────────────────────────────────────────

/// Undecoded line bits for one link clock (`lanes * 10` significant bits).
pub type RawWord = u64;

/// Width in bits of a raw word for the given lane count.
pub fn raw_width(lanes: usize) -> u32 {
    lanes as u32 * SYMBOL_BITS
}

/// Extract the code group carried by `lane` of a raw word.
pub fn lane_code(raw: RawWord, lanes: usize, lane: usize) -> u16 {
    let shift = SYMBOL_BITS * (lanes - 1 - lane) as u32;
    ((raw >> shift) & 0x3FF) as u16
}

fn check_lanes(lanes: usize) -> Result<(), SerwbError> {
    if lanes == 0 || lanes > MAX_LANES {
        return Err(SerwbError::Config(format!(
            "lane count must be 1..={MAX_LANES}, got {lanes}"
        )));
    }
    Ok(())
}

// ── WordEncoder ──────────────────────────────────────────────────

/// Encodes link words across all lanes, one disparity state per lane.
#[derive(Debug, Clone)]
pub struct WordEncoder {
    lanes: Vec<SymbolEncoder>,
}

impl WordEncoder {
    pub fn new(lanes: usize) -> Result<Self, SerwbError> {
        check_lanes(lanes)?;
        Ok(Self {
            lanes: vec![SymbolEncoder::new(); lanes],
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn encode(&mut self, word: LinkWord) -> Result<RawWord, SerwbError> {
        let n = self.lanes.len();
        let mut raw: RawWord = 0;
        for (lane, enc) in self.lanes.iter_mut().enumerate() {
            let control = word.k & (1 << lane) != 0;
            let code = enc.encode(control, word.lane(lane))?;
            raw |= (code as RawWord) << (SYMBOL_BITS * (n - 1 - lane) as u32);
        }
        Ok(raw)
    }

    pub fn reset(&mut self) {
        self.lanes.iter_mut().for_each(SymbolEncoder::reset);
    }
}

// ── WordDecoder ──────────────────────────────────────────────────

/// Decodes raw words across all lanes.
#[derive(Debug, Clone)]
pub struct WordDecoder {
    lanes: Vec<SymbolDecoder>,
}

impl WordDecoder {
    pub fn new(lanes: usize) -> Result<Self, SerwbError> {
        check_lanes(lanes)?;
        Ok(Self {
            lanes: vec![SymbolDecoder::new(); lanes],
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Decode every lane; the first failing lane is reported.
    ///
    /// All lanes are still clocked on error so their disparity keeps
    /// following the line.
    pub fn decode(&mut self, raw: RawWord) -> Result<LinkWord, DecodeError> {
        match self.decode_lossy(raw) {
            (word, None) => Ok(word),
            (_, Some(e)) => Err(e),
        }
    }

    /// Decode every lane and keep whatever could be recovered.
    ///
    /// Good lanes keep their symbols even when another lane fails. A lane
    /// with a disparity error keeps the byte its code group stands for; a
    /// code violation reads as a zero data byte.
    pub fn decode_lossy(&mut self, raw: RawWord) -> (LinkWord, Option<DecodeError>) {
        let n = self.lanes.len();
        let mut word = LinkWord::default();
        let mut first_err = None;
        for (lane, dec) in self.lanes.iter_mut().enumerate() {
            let sym = match dec.decode_best_effort(lane_code(raw, n, lane), lane) {
                Ok(sym) => Some(sym),
                Err((e, sym)) => {
                    first_err.get_or_insert(e);
                    sym
                }
            };
            if let Some(sym) = sym {
                word.data |= (sym.value as u32) << (8 * lane);
                if sym.control {
                    word.k |= 1 << lane;
                }
            }
        }
        (word, first_err)
    }

    pub fn reset(&mut self) {
        self.lanes.iter_mut().for_each(SymbolDecoder::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{COMMA_NEG, is_comma};

    #[test]
    fn comma_word_layout() {
        let mut enc = WordEncoder::new(4).unwrap();
        let raw = enc.encode(LinkWord::COMMA).unwrap();
        assert_eq!(lane_code(raw, 4, 0), COMMA_NEG);
        assert!(is_comma(lane_code(raw, 4, 0)));
        assert!(!is_comma(lane_code(raw, 4, 1)));
        assert_eq!(raw >> 40, 0);
    }

    #[test]
    fn words_decode_back_across_lanes() {
        let mut enc = WordEncoder::new(4).unwrap();
        let mut dec = WordDecoder::new(4).unwrap();
        let words = [
            LinkWord::COMMA,
            LinkWord::data(0xDEAD_BEEF),
            LinkWord::data(0),
            LinkWord::data(u32::MAX),
            LinkWord { data: 0x0000_FDBC, k: 0b0011 },
        ];
        for w in words {
            let raw = enc.encode(w).unwrap();
            assert_eq!(dec.decode(raw).unwrap(), w);
        }
    }

    #[test]
    fn single_lane_configuration() {
        let mut enc = WordEncoder::new(1).unwrap();
        let mut dec = WordDecoder::new(1).unwrap();
        for v in 0..=255u32 {
            let raw = enc.encode(LinkWord::data(v)).unwrap();
            assert!(raw < 1 << 10);
            assert_eq!(dec.decode(raw).unwrap(), LinkWord::data(v));
        }
    }

    #[test]
    fn lane_count_validated() {
        assert!(WordEncoder::new(0).is_err());
        assert!(WordDecoder::new(5).is_err());
    }

    #[test]
    fn corrupted_lane_reported() {
        let mut enc = WordEncoder::new(4).unwrap();
        let mut dec = WordDecoder::new(4).unwrap();
        let raw = enc.encode(LinkWord::data(0x1234_5678)).unwrap();
        // All-zero code group on lane 2 is never valid.
        let bad = raw & !(0x3FF << 10);
        let err = dec.decode(bad).unwrap_err();
        assert_eq!(err.lane(), 2);
    }

    #[test]
    fn lossy_decode_keeps_good_lanes() {
        let mut enc = WordEncoder::new(4).unwrap();
        let mut dec = WordDecoder::new(4).unwrap();
        let raw = enc.encode(LinkWord::data(0x1234_5678)).unwrap();
        let (word, err) = dec.decode_lossy(raw & !(0x3FF << 10));
        assert_eq!(err.map(|e| e.lane()), Some(2));
        assert_eq!(word, LinkWord::data(0x1200_5678));
    }
}

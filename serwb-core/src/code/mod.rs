//! DC-balanced 8b/10b line code.
//!
//! The line alphabet is the IBM 8b/10b code: every byte maps to one of
//! two 10-bit code groups, chosen by the running disparity so the line
//! stays DC balanced (the running sum never leaves {-1, +1} at symbol
//! boundaries, i.e. {-2, 0, +2} in bit counts). Twelve control symbols
//! (K-codes) are reserved; K28.5 is the link's COMMA.
//!
//! [`SymbolEncoder`] / [`SymbolDecoder`] handle one lane;
//! [`word`] combines lanes into link words.

mod tables;
pub mod word;

pub use tables::{CONTROL_SYMBOLS, is_control};
pub use word::{LinkWord, RawWord, WordDecoder, WordEncoder};

use crate::error::{DecodeError, SerwbError};

// ── Constants ────────────────────────────────────────────────────

/// Width of one code group in bits.
pub const SYMBOL_BITS: u32 = 10;

/// K28.5, the comma / idle control byte.
pub const K28_5: u8 = 0xBC;

/// K28.5 code group when sent with negative running disparity.
pub const COMMA_NEG: u16 = 0b001111_1010;

/// K28.5 code group when sent with positive running disparity.
pub const COMMA_POS: u16 = 0b110000_0101;

/// Returns `true` if `code` is either polarity of K28.5.
pub fn is_comma(code: u16) -> bool {
    code == COMMA_NEG || code == COMMA_POS
}

// ── Disparity ────────────────────────────────────────────────────

/// Running disparity sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disparity {
    /// More zeros than ones have been sent so far.
    #[default]
    Negative,
    /// More ones than zeros have been sent so far.
    Positive,
}

impl Disparity {
    fn flip(self) -> Self {
        match self {
            Self::Negative => Self::Positive,
            Self::Positive => Self::Negative,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }
}

// ── Symbol ───────────────────────────────────────────────────────

/// A decoded line symbol: one byte plus its control flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub value: u8,
    pub control: bool,
}

impl Symbol {
    pub const fn data(value: u8) -> Self {
        Self { value, control: false }
    }

    pub const fn control(value: u8) -> Self {
        Self { value, control: true }
    }
}

/// Encode one byte for the given entering disparity.
///
/// Returns the 10-bit code group and the running disparity after it.
pub fn encode_symbol(
    value: u8,
    control: bool,
    rd: Disparity,
) -> Result<(u16, Disparity), SerwbError> {
    if control && !is_control(value) {
        return Err(SerwbError::InvalidControl(value));
    }
    let x = value & 0x1F;
    let y = value >> 5;

    // 5b/6b
    let six_neg = if control && x == 28 {
        tables::K28_SIX
    } else {
        tables::FIVE_SIX[x as usize]
    };
    let six = match rd {
        Disparity::Negative => six_neg,
        Disparity::Positive => {
            if six_neg.count_ones() != 3 || (x == 7 && !control) {
                !six_neg & 0x3F
            } else {
                six_neg
            }
        }
    };
    let rd_mid = if six.count_ones() == 3 { rd } else { rd.flip() };

    // 3b/4b
    let four_neg = if control {
        tables::K_THREE_FOUR[y as usize]
    } else if y == 7 && tables::use_alt_seven(x, rd_mid) {
        tables::ALT_SEVEN
    } else {
        tables::THREE_FOUR[y as usize]
    };
    let four = match rd_mid {
        Disparity::Negative => four_neg,
        Disparity::Positive => {
            if control || four_neg.count_ones() != 2 || y == 3 {
                !four_neg & 0x0F
            } else {
                four_neg
            }
        }
    };
    let rd_out = if four.count_ones() == 2 { rd_mid } else { rd_mid.flip() };

    Ok((((six as u16) << 4) | four as u16, rd_out))
}

// ── SymbolEncoder ────────────────────────────────────────────────

/// Disparity-tracking encoder for one lane.
#[derive(Debug, Clone, Default)]
pub struct SymbolEncoder {
    rd: Disparity,
}

impl SymbolEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current running disparity.
    pub fn disparity(&self) -> Disparity {
        self.rd
    }

    /// Encode a symbol, choosing the variant that keeps the line balanced.
    pub fn encode(&mut self, control: bool, value: u8) -> Result<u16, SerwbError> {
        let (code, rd) = encode_symbol(value, control, self.rd)?;
        self.rd = rd;
        Ok(code)
    }

    pub fn reset(&mut self) {
        self.rd = Disparity::Negative;
    }
}

// ── SymbolDecoder ────────────────────────────────────────────────

/// Disparity-checking decoder for one lane.
#[derive(Debug, Clone, Default)]
pub struct SymbolDecoder {
    rd: Disparity,
}

impl SymbolDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disparity(&self) -> Disparity {
        self.rd
    }

    /// Decode one code group.
    ///
    /// Errors are reported, never corrected. After an error the decoder
    /// adopts the disparity implied by the received group so a single
    /// bit error does not cascade. A comma always re-synchronises.
    pub fn decode(&mut self, code: u16) -> Result<Symbol, DecodeError> {
        self.decode_lane(code, 0)
    }

    pub(crate) fn decode_lane(&mut self, code: u16, lane: usize) -> Result<Symbol, DecodeError> {
        self.decode_best_effort(code, lane).map_err(|(e, _)| e)
    }

    /// Like [`decode`](Self::decode), but a disparity error still hands
    /// back the symbol the code group stands for. A code violation has no
    /// symbol.
    pub(crate) fn decode_best_effort(
        &mut self,
        code: u16,
        lane: usize,
    ) -> Result<Symbol, (DecodeError, Option<Symbol>)> {
        let code = code & 0x3FF;
        let table = tables::decode_table();
        if let Some(entry) = table.get(self.rd, code) {
            self.rd = entry.rd_out;
            return Ok(entry.symbol);
        }
        match table.get(self.rd.flip(), code) {
            Some(entry) if is_comma(code) => {
                self.rd = entry.rd_out;
                Ok(entry.symbol)
            }
            Some(entry) => {
                self.rd = entry.rd_out;
                Err((DecodeError::Disparity { lane, code }, Some(entry.symbol)))
            }
            None => {
                self.rd = match code.count_ones() {
                    0..=4 => Disparity::Negative,
                    5 => self.rd,
                    _ => Disparity::Positive,
                };
                Err((DecodeError::CodeViolation { lane, code }, None))
            }
        }
    }

    pub fn reset(&mut self) {
        self.rd = Disparity::Negative;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_groups() {
        // D0.0, D21.5 and K28.5 from the published tables.
        assert_eq!(encode_symbol(0x00, false, Disparity::Negative).unwrap().0, 0b100111_0100);
        assert_eq!(encode_symbol(0x00, false, Disparity::Positive).unwrap().0, 0b011000_1011);
        assert_eq!(encode_symbol(0xB5, false, Disparity::Negative).unwrap().0, 0b101010_1010);
        assert_eq!(encode_symbol(K28_5, true, Disparity::Negative).unwrap().0, COMMA_NEG);
        assert_eq!(encode_symbol(K28_5, true, Disparity::Positive).unwrap().0, COMMA_POS);
    }

    #[test]
    fn every_symbol_decodes_back() {
        let mut enc = SymbolEncoder::new();
        let mut dec = SymbolDecoder::new();
        for value in 0..=255u8 {
            let code = enc.encode(false, value).unwrap();
            assert_eq!(dec.decode(code).unwrap(), Symbol::data(value));
        }
        for &value in CONTROL_SYMBOLS.iter() {
            let code = enc.encode(true, value).unwrap();
            assert_eq!(dec.decode(code).unwrap(), Symbol::control(value));
        }
    }

    #[test]
    fn running_disparity_stays_bounded() {
        let mut enc = SymbolEncoder::new();
        let mut sum: i32 = -1;
        for i in 0..4096u32 {
            let value = (i.wrapping_mul(2_654_435_761) >> 24) as u8;
            let code = enc.encode(false, value).unwrap();
            let ones = code.count_ones() as i32;
            sum += 2 * ones - 10;
            assert!(sum == -1 || sum == 1, "running sum drifted to {sum}");
        }
    }

    #[test]
    fn no_run_longer_than_five() {
        let mut enc = SymbolEncoder::new();
        let mut last = 2u16;
        let mut run = 0;
        for value in (0..=255u8).chain(0..=255u8) {
            let code = enc.encode(false, value).unwrap();
            for bit in (0..10).rev() {
                let b = (code >> bit) & 1;
                if b == last {
                    run += 1;
                } else {
                    last = b;
                    run = 1;
                }
                assert!(run <= 5, "run of {run} after {value:#04x}");
            }
        }
    }

    #[test]
    fn invalid_control_rejected() {
        let mut enc = SymbolEncoder::new();
        assert!(matches!(enc.encode(true, 0x00), Err(SerwbError::InvalidControl(0))));
    }

    #[test]
    fn code_violation_flagged() {
        let mut dec = SymbolDecoder::new();
        assert!(matches!(
            dec.decode(0b0000000000),
            Err(DecodeError::CodeViolation { .. })
        ));
        assert!(matches!(
            dec.decode(0b1111111111),
            Err(DecodeError::CodeViolation { .. })
        ));
    }

    #[test]
    fn disparity_error_flagged_then_recovers() {
        let mut enc = SymbolEncoder::new();
        let mut dec = SymbolDecoder::new();
        // D0.1 in RD- carries six ones; repeating it without flipping is illegal.
        let first = enc.encode(false, 0x20).unwrap();
        assert!(dec.decode(first).is_ok());
        assert!(matches!(
            dec.decode(first),
            Err(DecodeError::Disparity { .. })
        ));
        // After the error the decoder follows the line again.
        let mut enc = SymbolEncoder { rd: dec.disparity() };
        let next = enc.encode(false, 0x42).unwrap();
        assert_eq!(dec.decode(next).unwrap(), Symbol::data(0x42));
    }

    #[test]
    fn disparity_error_keeps_the_symbol() {
        let mut enc = SymbolEncoder::new();
        let mut dec = SymbolDecoder::new();
        let first = enc.encode(false, 0x20).unwrap();
        dec.decode(first).unwrap();
        match dec.decode_best_effort(first, 1) {
            Err((DecodeError::Disparity { lane: 1, .. }, Some(sym))) => assert_eq!(sym, Symbol::data(0x20)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            dec.decode_best_effort(0, 0),
            Err((DecodeError::CodeViolation { .. }, None))
        ));
    }

    #[test]
    fn comma_resyncs_disparity() {
        let mut dec = SymbolDecoder { rd: Disparity::Positive };
        assert_eq!(dec.decode(COMMA_NEG).unwrap(), Symbol::control(K28_5));
        assert_eq!(dec.disparity(), Disparity::Positive);
        assert_eq!(dec.decode(COMMA_POS).unwrap(), Symbol::control(K28_5));
        assert_eq!(dec.disparity(), Disparity::Negative);
    }
}

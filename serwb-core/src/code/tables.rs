//! 8b/10b sub-block tables and the derived decode lookup.
//!
//! Values are written with bit `a` (resp. `f`) as the most significant
//! bit, in the column used when the entering running disparity is
//! negative. The positive column is derived by complementing.

use std::sync::OnceLock;

use super::{Disparity, Symbol};

/// 5b/6b sub-block (abcdei) for D.x, entering RD-.
pub(crate) const FIVE_SIX: [u8; 32] = [
    0b100111, 0b011101, 0b101101, 0b110001, 0b110101, 0b101001, 0b011001, 0b111000, // 0..7
    0b111001, 0b100101, 0b010101, 0b110100, 0b001101, 0b101100, 0b011100, 0b010111, // 8..15
    0b011011, 0b100011, 0b010011, 0b110010, 0b001011, 0b101010, 0b011010, 0b111010, // 16..23
    0b110011, 0b100110, 0b010110, 0b110110, 0b001110, 0b101110, 0b011110, 0b101011, // 24..31
];

/// 5b/6b sub-block for K.28, entering RD-.
pub(crate) const K28_SIX: u8 = 0b001111;

/// 3b/4b sub-block (fghj) for D.x.y, entering RD-. Index 7 is the
/// primary encoding; the alternate is [`ALT_SEVEN`].
pub(crate) const THREE_FOUR: [u8; 8] = [
    0b1011, 0b1001, 0b0101, 0b1100, 0b1101, 0b1010, 0b0110, 0b1110,
];

/// Alternate D.x.A7, entering RD-.
pub(crate) const ALT_SEVEN: u8 = 0b0111;

/// 3b/4b sub-block for K.x.y, entering RD-. Always complemented for RD+.
pub(crate) const K_THREE_FOUR: [u8; 8] = [
    0b1011, 0b0110, 0b1010, 0b1100, 0b1101, 0b0101, 0b1001, 0b0111,
];

/// Every control byte the alphabet can carry.
pub const CONTROL_SYMBOLS: [u8; 12] = [
    0x1C, 0x3C, 0x5C, 0x7C, 0x9C, 0xBC, 0xDC, 0xFC, // K28.0 .. K28.7
    0xF7, 0xFB, 0xFD, 0xFE, // K23.7, K27.7, K29.7, K30.7
];

/// Returns `true` when `value` is a valid control byte.
pub fn is_control(value: u8) -> bool {
    CONTROL_SYMBOLS.contains(&value)
}

/// Whether D.x.7 must use the alternate encoding to avoid a run of five.
pub(crate) fn use_alt_seven(x: u8, rd: Disparity) -> bool {
    match rd {
        Disparity::Negative => matches!(x, 17 | 18 | 20),
        Disparity::Positive => matches!(x, 11 | 13 | 14),
    }
}

// ── Decode lookup ────────────────────────────────────────────────

/// One valid code group for a given entering disparity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub symbol: Symbol,
    pub rd_out: Disparity,
}

/// Reverse lookup indexed by `[entering disparity][code group]`.
pub(crate) struct DecodeTable {
    entries: [[Option<Entry>; 1024]; 2],
}

impl DecodeTable {
    fn build() -> Self {
        let mut entries = [[None; 1024]; 2];
        for rd in [Disparity::Negative, Disparity::Positive] {
            let data = (0..=255u8).map(|v| (v, false));
            let control = CONTROL_SYMBOLS.iter().map(|&v| (v, true));
            for (value, k) in data.chain(control) {
                // Every (value, k) pair here is encodable by construction.
                if let Ok((code, rd_out)) = super::encode_symbol(value, k, rd) {
                    entries[rd.index()][code as usize] = Some(Entry {
                        symbol: Symbol { value, control: k },
                        rd_out,
                    });
                }
            }
        }
        Self { entries }
    }

    /// Look up a code group for the given entering disparity.
    pub fn get(&self, rd: Disparity, code: u16) -> Option<Entry> {
        self.entries[rd.index()][(code & 0x3FF) as usize]
    }
}

/// Shared, lazily built decode table.
pub(crate) fn decode_table() -> &'static DecodeTable {
    static TABLE: OnceLock<DecodeTable> = OnceLock::new();
    TABLE.get_or_init(DecodeTable::build)
}

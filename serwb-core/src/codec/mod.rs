//! Frame codec for the post-training data word stream.
//!
//! Words travel as little-endian bytes in a [`BytesMut`] so the framing
//! can be driven through `tokio_util`'s [`Decoder`] / [`Encoder`].
//!
//! ```text
//! ┌──────────┬────────┬──────────────────┬────────┐
//! │ PREAMBLE │ LENGTH │ payload (LENGTH) │ CRC-32 │
//! └──────────┴────────┴──────────────────┴────────┘
//! ```
//!
//! The CRC covers LENGTH and the payload. When it does not match, only the
//! preamble word is consumed and hunting resumes on the following words,
//! so a corrupted length field can never swallow the frames behind it.

mod packetizer;

pub use packetizer::{Depacketizer, Packetizer};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::SerwbError;

/// Frame start marker.
pub const PREAMBLE: u32 = 0x5AA5_5AA5;

/// Preamble, length and CRC.
pub const FRAME_OVERHEAD_WORDS: usize = 3;

const WORD: usize = 4;

/// Framing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames that passed the integrity check.
    pub frames: u64,
    /// Frames dropped on CRC mismatch.
    pub crc_drops: u64,
    /// Bad length fields, unparseable records and timed-out partial frames.
    pub malformed: u64,
    /// Words skipped while looking for a preamble.
    pub hunted_words: u64,
}

/// Read the `index`-th little-endian word of `src`.
fn peek(src: &[u8], index: usize) -> u32 {
    let mut b = &src[index * WORD..];
    b.get_u32_le()
}

// ── SerwbCodec ───────────────────────────────────────────────────

/// Frames payload word vectors.
#[derive(Debug, Clone)]
pub struct SerwbCodec {
    max_payload_words: usize,
    stats: FrameStats,
}

impl SerwbCodec {
    pub fn new(max_payload_words: usize) -> Self {
        Self {
            max_payload_words,
            stats: FrameStats::default(),
        }
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FrameStats {
        &mut self.stats
    }

    pub fn max_payload_words(&self) -> usize {
        self.max_payload_words
    }
}

impl Decoder for SerwbCodec {
    type Item = Vec<u32>;
    type Error = SerwbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Hunt for the preamble.
        loop {
            if src.len() < WORD {
                return Ok(None);
            }
            if peek(src, 0) == PREAMBLE {
                break;
            }
            src.advance(WORD);
            self.stats.hunted_words += 1;
        }

        if src.len() < 2 * WORD {
            return Ok(None);
        }
        let length = peek(src, 1) as usize;
        if length == 0 || length > self.max_payload_words {
            src.advance(WORD);
            self.stats.malformed += 1;
            return Err(SerwbError::InvalidLength {
                length,
                max: self.max_payload_words,
            });
        }

        let total = (FRAME_OVERHEAD_WORDS + length) * WORD;
        if src.len() < total {
            return Ok(None);
        }

        let body_end = (2 + length) * WORD;
        let actual = crc32fast::hash(&src[WORD..body_end]);
        let expected = peek(src, 2 + length);
        if actual != expected {
            src.advance(WORD);
            self.stats.crc_drops += 1;
            return Err(SerwbError::CrcMismatch { expected, actual });
        }

        let frame = src.split_to(total);
        let mut body = &frame[2 * WORD..body_end];
        let payload = (0..length).map(|_| body.get_u32_le()).collect();
        self.stats.frames += 1;
        Ok(Some(payload))
    }
}

impl Encoder<Vec<u32>> for SerwbCodec {
    type Error = SerwbError;

    fn encode(&mut self, item: Vec<u32>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.is_empty() || item.len() > self.max_payload_words {
            return Err(SerwbError::InvalidLength {
                length: item.len(),
                max: self.max_payload_words,
            });
        }
        dst.reserve((FRAME_OVERHEAD_WORDS + item.len()) * WORD);
        dst.put_u32_le(PREAMBLE);
        let start = dst.len();
        dst.put_u32_le(item.len() as u32);
        for word in &item {
            dst.put_u32_le(*word);
        }
        let crc = crc32fast::hash(&dst[start..]);
        dst.put_u32_le(crc);
        debug!(words = item.len(), crc, "frame encoded");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn words(buf: &BytesMut) -> Vec<u32> {
        (0..buf.len() / WORD).map(|i| peek(buf, i)).collect()
    }

    fn from_words(ws: &[u32]) -> BytesMut {
        let mut buf = BytesMut::new();
        ws.iter().for_each(|w| buf.put_u32_le(*w));
        buf
    }

    /// Decode everything, collecting frames and errors in order.
    fn drain(codec: &mut SerwbCodec, buf: &mut BytesMut) -> (Vec<Vec<u32>>, usize) {
        let mut frames = Vec::new();
        let mut errors = 0;
        loop {
            match codec.decode(buf) {
                Ok(Some(f)) => frames.push(f),
                Ok(None) => break,
                Err(_) => errors += 1,
            }
        }
        (frames, errors)
    }

    #[test]
    fn frame_layout() {
        let mut codec = SerwbCodec::new(64);
        let mut buf = BytesMut::new();
        codec.encode(vec![0x11, 0x22], &mut buf).unwrap();
        let w = words(&buf);
        assert_eq!(w.len(), 5);
        assert_eq!(w[0], PREAMBLE);
        assert_eq!(w[1], 2);
        let mut crc_input = Vec::new();
        for x in [2u32, 0x11, 0x22] {
            crc_input.extend_from_slice(&x.to_le_bytes());
        }
        assert_eq!(w[4], crc32fast::hash(&crc_input));
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut codec = SerwbCodec::new(64);
        let mut full = BytesMut::new();
        codec.encode(vec![1, 2, 3], &mut full).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..full.len() - WORD]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - WORD..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec![1, 2, 3]));
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_before_preamble_is_hunted() {
        let mut codec = SerwbCodec::new(64);
        let mut buf = from_words(&[0, 0xFFFF_FFFF, 0x1234]);
        codec.encode(vec![9], &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec![9]));
        assert_eq!(codec.stats().hunted_words, 3);
    }

    #[test]
    fn corrupt_payload_drops_exactly_one_frame() {
        let mut codec = SerwbCodec::new(64);
        let mut buf = BytesMut::new();
        for f in [vec![1, 2], vec![3, 4], vec![5, 6]] {
            codec.encode(f, &mut buf).unwrap();
        }
        let mut w = words(&buf);
        w[5 + 2] ^= 0x0100; // first payload word of the second frame
        let mut buf = from_words(&w);

        let (frames, errors) = drain(&mut codec, &mut buf);
        assert_eq!(frames, vec![vec![1, 2], vec![5, 6]]);
        assert_eq!(errors, 1);
        assert_eq!(codec.stats().crc_drops, 1);
        assert_eq!(codec.stats().frames, 2);
    }

    #[test]
    fn corrupt_length_does_not_swallow_followers() {
        let mut codec = SerwbCodec::new(64);
        let mut buf = BytesMut::new();
        for f in [vec![1], vec![2], vec![3], vec![4]] {
            codec.encode(f, &mut buf).unwrap();
        }
        let mut w = words(&buf);
        w[4 + 1] = 3; // second frame now claims three payload words
        let mut buf = from_words(&w);

        let (frames, _) = drain(&mut codec, &mut buf);
        assert_eq!(frames, vec![vec![1], vec![3], vec![4]]);
        assert_eq!(codec.stats().crc_drops, 1);
    }

    #[test]
    fn out_of_range_length_rejected() {
        let mut codec = SerwbCodec::new(4);
        let mut buf = from_words(&[PREAMBLE, 5, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(SerwbError::InvalidLength { length: 5, max: 4 })
        ));
        assert_eq!(codec.stats().malformed, 1);

        assert!(codec.encode(vec![0; 5], &mut BytesMut::new()).is_err());
        assert!(codec.encode(vec![], &mut BytesMut::new()).is_err());
    }
}

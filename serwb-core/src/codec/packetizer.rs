//! Word-stream adapters around [`SerwbCodec`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::{FrameStats, PREAMBLE, SerwbCodec, WORD, peek};
use crate::bridge::WordSource;
use crate::code::LinkWord;
use crate::error::SerwbError;
use crate::packet::Packet;

// ── Packetizer ───────────────────────────────────────────────────

/// Data word sent after every frame.
///
/// The descrambler spreads a line error up to 23 bits forward; the guard
/// takes that spread so the next frame's preamble arrives intact.
pub const FRAME_GUARD: u32 = 0;

/// Turns packets into a stream of data words.
#[derive(Debug)]
pub struct Packetizer {
    codec: SerwbCodec,
    out: BytesMut,
}

impl Packetizer {
    pub fn new(max_payload_words: usize) -> Self {
        Self {
            codec: SerwbCodec::new(max_payload_words),
            out: BytesMut::new(),
        }
    }

    /// Queue one packet for transmission.
    pub fn push(&mut self, packet: &Packet) -> Result<(), SerwbError> {
        self.push_all(std::slice::from_ref(packet))
    }

    /// Queue several packets, all of them or none.
    pub fn push_all(&mut self, packets: &[Packet]) -> Result<(), SerwbError> {
        let mut frames = BytesMut::new();
        for packet in packets {
            self.codec.encode(packet.to_words(), &mut frames)?;
            frames.put_u32_le(FRAME_GUARD);
        }
        self.out.unsplit(frames);
        Ok(())
    }

    /// Words still waiting to be sent.
    pub fn pending_words(&self) -> usize {
        self.out.len() / WORD
    }

    pub fn is_idle(&self) -> bool {
        self.out.is_empty()
    }

    /// Next word on the line: frame data, or a comma when idle.
    pub fn next_word(&mut self) -> LinkWord {
        self.pull().unwrap_or(LinkWord::COMMA)
    }

    /// Drop everything not yet sent.
    pub fn reset(&mut self) {
        if !self.out.is_empty() {
            debug!(words = self.pending_words(), "discarding unsent frame words");
        }
        self.out.clear();
    }
}

impl WordSource for Packetizer {
    fn pull(&mut self) -> Option<LinkWord> {
        if self.out.len() < WORD {
            return None;
        }
        Some(LinkWord::data(self.out.get_u32_le()))
    }
}

// ── Depacketizer ─────────────────────────────────────────────────

/// Recovers packets from the received data word stream.
///
/// Control words (idle fill, sync commas) are ignored. Corrupt frames are
/// dropped whole; nothing partial is ever returned.
#[derive(Debug)]
pub struct Depacketizer {
    codec: SerwbCodec,
    buf: BytesMut,
}

impl Depacketizer {
    pub fn new(max_payload_words: usize) -> Self {
        Self {
            codec: SerwbCodec::new(max_payload_words),
            buf: BytesMut::new(),
        }
    }

    pub fn push(&mut self, word: LinkWord) {
        if word.is_control() {
            return;
        }
        self.buf.extend_from_slice(&word.data.to_le_bytes());
    }

    /// Next complete, verified packet, if any.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(words)) => match Packet::from_words(&words) {
                    Ok(packet) => return Some(packet),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed record");
                        self.codec.stats_mut().malformed += 1;
                    }
                },
                Ok(None) => return None,
                Err(e) => debug!(error = %e, "dropping frame"),
            }
        }
    }

    /// A frame start has been seen but the frame is not complete.
    pub fn has_partial(&self) -> bool {
        self.buf.len() >= WORD && peek(&self.buf, 0) == PREAMBLE
    }

    /// Give up on a partial frame that stopped arriving.
    ///
    /// Only its preamble is discarded; the words behind it are searched
    /// again, so call [`next_packet`](Self::next_packet) afterwards.
    pub fn expire(&mut self) {
        if self.has_partial() {
            debug!(buffered = self.buf.len() / WORD, "partial frame timed out");
            self.buf.advance(WORD);
            self.codec.stats_mut().malformed += 1;
        }
    }

    pub fn stats(&self) -> &FrameStats {
        self.codec.stats()
    }

    /// Forget buffered words (link reset).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

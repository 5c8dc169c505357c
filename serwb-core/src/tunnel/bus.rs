//! Local bus interface and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SerwbError;
use crate::state::Completion;

/// A memory-mapped bus the responder drives.
///
/// Addresses are byte addresses of 32-bit words.
#[async_trait]
pub trait Bus: Send {
    async fn read(&mut self, address: u32) -> Result<u32, SerwbError>;

    /// Write the byte lanes selected by `byte_enable` (bit `n` = bits `8n+7..8n`).
    async fn write(&mut self, address: u32, value: u32, byte_enable: u8) -> Result<(), SerwbError>;
}

/// Expand a 4-bit byte-enable into a 32-bit lane mask.
pub fn byte_mask(byte_enable: u8) -> u32 {
    (0..4u32)
        .filter(|lane| byte_enable & (1 << lane) != 0)
        .fold(0, |mask, lane| mask | (0xFF << (8 * lane)))
}

// ── BusTransaction ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    /// Consecutive words starting at the transaction address.
    Write { data: Vec<u32>, byte_enable: u8 },
    Read { count: usize },
}

/// One operation issued on the requester's local bus.
#[derive(Debug)]
pub struct BusTransaction {
    pub address: u32,
    pub op: BusOp,
    /// Signalled when the operation completes: empty for writes, the data
    /// for reads.
    pub done: Completion,
}

// ── MemoryBus ────────────────────────────────────────────────────

/// Kind of access recorded by [`MemoryBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read { address: u32, value: u32 },
    Write { address: u32, value: u32, byte_enable: u8 },
}

#[derive(Debug, Default)]
struct Memory {
    words: HashMap<u32, u32>,
    log: Vec<Access>,
}

/// Sparse word memory with byte-enable merge. Unwritten words read as 0.
///
/// Clones share the same memory, so a test can keep a handle while the
/// responder owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Memory>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of a word, without logging an access.
    pub async fn peek(&self, address: u32) -> u32 {
        let mem = self.inner.lock().await;
        mem.words.get(&(address & !3)).copied().unwrap_or(0)
    }

    /// Set a word directly, without logging an access.
    pub async fn poke(&self, address: u32, value: u32) {
        self.inner.lock().await.words.insert(address & !3, value);
    }

    /// Every access performed through the [`Bus`] trait, in order.
    pub async fn accesses(&self) -> Vec<Access> {
        self.inner.lock().await.log.clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn read(&mut self, address: u32) -> Result<u32, SerwbError> {
        let mut mem = self.inner.lock().await;
        let value = mem.words.get(&(address & !3)).copied().unwrap_or(0);
        mem.log.push(Access::Read { address, value });
        Ok(value)
    }

    async fn write(&mut self, address: u32, value: u32, byte_enable: u8) -> Result<(), SerwbError> {
        let mask = byte_mask(byte_enable);
        let mut mem = self.inner.lock().await;
        let slot = mem.words.entry(address & !3).or_insert(0);
        *slot = (*slot & !mask) | (value & mask);
        mem.log.push(Access::Write {
            address,
            value,
            byte_enable,
        });
        Ok(())
    }
}

//! # serwb-core
//!
//! Protocol stack for SerWB, a point-to-point serial link that tunnels a
//! memory-mapped bus between two endpoints.
//!
//! This crate contains:
//! - **Line code**: `SymbolEncoder` / `SymbolDecoder` (8b/10b) and the multi-lane `WordEncoder` / `WordDecoder`
//! - **Alignment**: `BitAligner` for symbol-boundary recovery with bitslip
//! - **Training**: `LinkTrainer`, a pure transition function plus a logging wrapper
//! - **Scrambling**: self-synchronising `Scrambler` / `Descrambler`
//! - **Framing**: `SerwbCodec` (CRC-32 frames via `tokio_util`), `Packetizer` / `Depacketizer`
//! - **Tunnel**: `BusTunnel`, the `Bus` trait and the in-memory `MemoryBus`
//! - **Bridge**: `ClockDomainBridge` between the line and bus domains
//! - **Endpoint / Service**: `LinkEndpoint` (one line clock per call) and `spawn_endpoint`
//! - **PHY model**: `WirePort` pairs with bit skew and error injection
//! - **Error**: `SerwbError`, a typed, `thiserror`-based error hierarchy

pub mod align;
pub mod bridge;
pub mod code;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod packet;
pub mod phy;
pub mod scrambler;
pub mod service;
pub mod state;
pub mod tunnel;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use align::{AlignOutput, AlignStatus, BitAligner};
pub use bridge::{BusSide, ClockDomainBridge, LineSide, RxWord, WordSource};
pub use code::{LinkWord, RawWord, WordDecoder, WordEncoder};
pub use codec::{Depacketizer, FrameStats, PREAMBLE, Packetizer, SerwbCodec};
pub use config::LinkConfig;
pub use endpoint::{Control, LinkEndpoint, LinkStatus, Tick};
pub use error::{DecodeError, SerwbError};
pub use flags::{PhyStatus, TrainerActions};
pub use header::RecordHeader;
pub use message::{BusRole, Opcode};
pub use packet::Packet;
pub use phy::{BitSkew, ErrorInjector, WirePort, wire_pair};
pub use scrambler::{Descrambler, Scrambler};
pub use service::{BusHandle, EndpointHandle, spawn_endpoint};
pub use state::{LinkRole, LinkState, LinkTrainer, TxMode};
pub use tunnel::{Bus, BusTunnel, MemoryBus};

//! # serwb-loopback: SerWB link simulator
//!
//! Wires a link master and a link slave back to back over a simulated
//! lane pair with configurable bit skew and bit-error injection, trains
//! the link, and pushes scripted bus traffic through the tunnel.
//!
//! ## Roles
//!
//! - **Link master / bus requester**: provides the link clock and issues
//!   reads and writes through its `BusHandle`.
//! - **Link slave / bus responder**: executes the requests on an
//!   in-memory bus.

pub mod config;
pub mod service;

//! Loopback run: a master and a slave endpoint over one simulated lane pair.
//!
//! The link master is the bus requester; the link slave drives an
//! in-memory bus. A pattern is written across the tunnel, read back and
//! compared, both through the tunnel and against the remote memory.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use serwb_core::{
    BusRole, LinkRole, LinkStatus, MemoryBus, SerwbError, spawn_endpoint, wire_pair,
};

use crate::config::LoopbackConfig;

// ── LoopbackReport ───────────────────────────────────────────────

/// A word that did not come back as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub address: u32,
    pub expected: u32,
    pub actual: u32,
}

/// Outcome of one loopback run.
#[derive(Debug, Clone)]
pub struct LoopbackReport {
    /// Time from start-up until both ends were READY.
    pub training: Duration,
    /// Time spent on the traffic script.
    pub traffic: Duration,
    pub words: usize,
    /// Read-back differences seen through the tunnel.
    pub mismatches: Vec<Mismatch>,
    /// Words whose remote memory content differs from the pattern.
    pub remote_mismatches: usize,
    pub master: LinkStatus,
    pub slave: LinkStatus,
}

impl LoopbackReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.remote_mismatches == 0
    }

    /// Emit the summary through `tracing`.
    pub fn log(&self) {
        info!(
            words = self.words,
            training = ?self.training,
            traffic = ?self.traffic,
            master_offset = ?self.master.offset,
            slave_offset = ?self.slave.offset,
            decode_errors = self.master.decode_errors + self.slave.decode_errors,
            retrains = self.master.generation.saturating_sub(1),
            "loopback summary"
        );
        for m in self.mismatches.iter().take(8) {
            warn!(
                address = format_args!("{:#010x}", m.address),
                expected = format_args!("{:#010x}", m.expected),
                actual = format_args!("{:#010x}", m.actual),
                "read-back mismatch"
            );
        }
        if self.passed() {
            info!("loopback passed");
        } else {
            warn!(
                mismatches = self.mismatches.len(),
                remote = self.remote_mismatches,
                "loopback failed"
            );
        }
    }
}

/// Address-dependent test pattern.
pub fn pattern(base: u32, words: usize) -> Vec<u32> {
    (0..words as u32)
        .map(|i| {
            let address = base.wrapping_add(4 * i);
            (address ^ 0xA5A5_5A5A).rotate_left(i % 32) ^ i.wrapping_mul(0x9E37_79B9)
        })
        .collect()
}

// ── LoopbackService ──────────────────────────────────────────────

pub struct LoopbackService {
    config: LoopbackConfig,
}

impl LoopbackService {
    pub fn new(config: LoopbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// Bring the link up, run the traffic script and shut both ends down.
    pub async fn run(&self) -> Result<LoopbackReport, SerwbError> {
        let link = &self.config.link;
        let wire = &self.config.wire;
        let traffic = &self.config.traffic;
        link.validate()?;

        let (a, b) = wire_pair(link.word_bits(), wire.depth, wire.skew_ab, wire.skew_ba);
        let (a, b) = if wire.error_interval > 0 {
            (a.with_errors(wire.error_interval), b.with_errors(wire.error_interval))
        } else {
            (a, b)
        };
        info!(
            lanes = link.lanes,
            skew_ab = wire.skew_ab,
            skew_ba = wire.skew_ba,
            error_interval = wire.error_interval,
            "starting loopback"
        );

        let memory = MemoryBus::new();
        let master = spawn_endpoint(link, LinkRole::Master, BusRole::Slave, a, None)?;
        let slave = spawn_endpoint(
            link,
            LinkRole::Slave,
            BusRole::Master,
            b,
            Some(Box::new(memory.clone())),
        )?;

        let started = Instant::now();
        let limit = Duration::from_millis(wire.ready_timeout_ms);
        master.wait_ready(limit).await?;
        slave.wait_ready(limit).await?;
        let training = started.elapsed();
        info!(?training, "link ready");

        let bus = master
            .bus()
            .ok_or(SerwbError::Config("link master has no bus port".into()))?;
        let expected = pattern(traffic.base_address, traffic.words);
        let address = |i: usize| traffic.base_address.wrapping_add(4 * i as u32);

        let started = Instant::now();
        let readback = if traffic.burst {
            bus.write_burst(traffic.base_address, &expected).await?;
            bus.read_burst(traffic.base_address, expected.len()).await?
        } else {
            for (i, value) in expected.iter().enumerate() {
                bus.write(address(i), *value).await?;
            }
            let mut out = Vec::with_capacity(expected.len());
            for i in 0..expected.len() {
                out.push(bus.read(address(i)).await?);
            }
            out
        };
        let traffic_time = started.elapsed();

        let mismatches: Vec<Mismatch> = expected
            .iter()
            .zip(&readback)
            .enumerate()
            .filter(|(_, (e, a))| e != a)
            .map(|(i, (e, a))| Mismatch {
                address: address(i),
                expected: *e,
                actual: *a,
            })
            .collect();

        let mut remote_mismatches = 0;
        for (i, value) in expected.iter().enumerate() {
            if memory.peek(address(i)).await != *value {
                remote_mismatches += 1;
            }
        }

        let report = LoopbackReport {
            training,
            traffic: traffic_time,
            words: expected.len(),
            mismatches,
            remote_mismatches,
            master: master.status(),
            slave: slave.status(),
        };

        master.shutdown().await?;
        slave.shutdown().await?;
        Ok(report)
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Async link service: one line task and one bus task per endpoint.
//!
//! ```text
//!   WirePort ◄──► line task ◄── ClockDomainBridge ──► bus task ◄──► Bus / BusHandle
//!                (LinkEndpoint)                      (BusTunnel, framing)
//! ```
//!
//! The line task is clocked by the wire: every iteration drives one raw
//! word and samples one. The status register is a `watch` channel updated
//! by the line task. Received words carry the datapath generation they
//! were decoded in; the bus task drops in-flight frames when it changes.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bridge::{BusSide, ClockDomainBridge, LineSide, RxWord, WordSource};
use crate::code::{LinkWord, RawWord};
use crate::codec::{Depacketizer, Packetizer};
use crate::config::LinkConfig;
use crate::endpoint::{Control, LinkEndpoint, LinkStatus};
use crate::error::SerwbError;
use crate::header::BYTE_ENABLE_ALL;
use crate::message::BusRole;
use crate::packet::Packet;
use crate::phy::WirePort;
use crate::state::{LinkRole, LinkState};
use crate::tunnel::{Bus, BusOp, BusTransaction, BusTunnel};

/// Queue depth for local bus requests and control writes.
const REQUEST_QUEUE: usize = 64;

// ── BusHandle ────────────────────────────────────────────────────

/// Local bus port of a requester endpoint.
///
/// Every call waits for the link to carry it: writes return once queued
/// for transmission, reads once the response arrives.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusTransaction>,
    max_burst: usize,
}

impl BusHandle {
    async fn submit(&self, address: u32, op: BusOp) -> Result<Vec<u32>, SerwbError> {
        let (done, rx) = oneshot::channel();
        self.tx.send(BusTransaction { address, op, done }).await?;
        rx.await?
    }

    /// Full-word write.
    pub async fn write(&self, address: u32, value: u32) -> Result<(), SerwbError> {
        self.write_masked(address, value, BYTE_ENABLE_ALL).await
    }

    /// Write only the byte lanes selected by `byte_enable`.
    pub async fn write_masked(&self, address: u32, value: u32, byte_enable: u8) -> Result<(), SerwbError> {
        self.submit(
            address,
            BusOp::Write {
                data: vec![value],
                byte_enable,
            },
        )
        .await
        .map(|_| ())
    }

    /// Consecutive full-word writes starting at `address`.
    pub async fn write_burst(&self, address: u32, data: &[u32]) -> Result<(), SerwbError> {
        if data.is_empty() {
            return Ok(());
        }
        self.submit(
            address,
            BusOp::Write {
                data: data.to_vec(),
                byte_enable: BYTE_ENABLE_ALL,
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn read(&self, address: u32) -> Result<u32, SerwbError> {
        let data = self.submit(address, BusOp::Read { count: 1 }).await?;
        data.first()
            .copied()
            .ok_or(SerwbError::ProtocolViolation("empty read response"))
    }

    /// Read `count` consecutive words, one frame-sized read at a time.
    pub async fn read_burst(&self, address: u32, count: usize) -> Result<Vec<u32>, SerwbError> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let n = (count - out.len()).min(self.max_burst);
            let at = address.wrapping_add(4 * out.len() as u32);
            out.extend(self.submit(at, BusOp::Read { count: n }).await?);
        }
        Ok(out)
    }
}

// ── EndpointHandle ───────────────────────────────────────────────

/// A running endpoint. Dropping it stops both tasks.
#[derive(Debug)]
pub struct EndpointHandle {
    link_role: LinkRole,
    bus_role: BusRole,
    status: watch::Receiver<LinkStatus>,
    control: mpsc::Sender<Control>,
    bus: Option<BusHandle>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<Result<(), SerwbError>>>,
}

impl EndpointHandle {
    pub fn link_role(&self) -> LinkRole {
        self.link_role
    }

    pub fn bus_role(&self) -> BusRole {
        self.bus_role
    }

    /// Current content of the status register.
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// The local bus port; `None` for a responder.
    pub fn bus(&self) -> Option<BusHandle> {
        self.bus.clone()
    }

    /// Write the control register.
    pub async fn control(&self, control: Control) -> Result<(), SerwbError> {
        self.control.send(control).await?;
        Ok(())
    }

    /// Wait until the link reaches READY.
    ///
    /// Fails with [`SerwbError::TrainingFailed`] if it lands in ERROR
    /// instead.
    pub async fn wait_ready(&self, limit: Duration) -> Result<LinkStatus, SerwbError> {
        let mut rx = self.status.clone();
        let waited = tokio::time::timeout(
            limit,
            rx.wait_for(|s| s.state == LinkState::Ready || s.error),
        )
        .await;
        match waited {
            Err(_) => Err(SerwbError::Timeout(limit)),
            Ok(Err(_)) => Err(SerwbError::ChannelClosed),
            Ok(Ok(status)) if status.error => Err(SerwbError::TrainingFailed),
            Ok(Ok(status)) => Ok(*status),
        }
    }

    /// Stop both tasks and wait for them.
    pub async fn shutdown(mut self) -> Result<(), SerwbError> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        let mut first_err = None;
        for joined in futures::future::join_all(tasks).await {
            let result = joined.unwrap_or_else(|e| Err(SerwbError::Other(format!("task failed: {e}"))));
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        info!(role = %self.link_role, "endpoint stopped");
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for EndpointHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── spawn_endpoint ───────────────────────────────────────────────

/// Start an endpoint on `port`.
///
/// A [`BusRole::Master`] endpoint serves requests on `bus`, which is
/// required. A [`BusRole::Slave`] endpoint originates requests through
/// [`EndpointHandle::bus`] and takes no local bus.
pub fn spawn_endpoint(
    config: &LinkConfig,
    link_role: LinkRole,
    bus_role: BusRole,
    port: WirePort,
    bus: Option<Box<dyn Bus>>,
) -> Result<EndpointHandle, SerwbError> {
    match (bus_role, bus.is_some()) {
        (BusRole::Master, false) => {
            return Err(SerwbError::Config("a bus master endpoint needs a local bus".into()));
        }
        (BusRole::Slave, true) => {
            return Err(SerwbError::Config("a bus slave endpoint takes no local bus".into()));
        }
        _ => {}
    }

    let endpoint = LinkEndpoint::new(config, link_role)?;
    let (status_tx, status_rx) = watch::channel(endpoint.status());
    let (control_tx, control_rx) = mpsc::channel(REQUEST_QUEUE);
    let (line, bus_side) = ClockDomainBridge::new(config.bridge.depth);
    let cancel = CancellationToken::new();

    let (requests, handle) = match bus_role {
        BusRole::Slave => {
            let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
            let handle = BusHandle {
                tx,
                max_burst: config.max_burst_words(),
            };
            (Some(rx), Some(handle))
        }
        BusRole::Master => (None, None),
    };

    let line_task = LineTask {
        endpoint,
        port,
        line,
        control: control_rx,
        status: status_tx,
        cancel: cancel.clone(),
    };
    let bus_task = BusTask::new(
        config,
        BusTunnel::new(bus_role, config),
        bus,
        bus_side,
        status_rx.clone(),
        requests,
        cancel.clone(),
    );

    info!(link = %link_role, bus = %bus_role, lanes = config.lanes, "endpoint starting");
    let tasks = vec![tokio::spawn(line_task.run()), tokio::spawn(bus_task.run())];

    Ok(EndpointHandle {
        link_role,
        bus_role,
        status: status_rx,
        control: control_tx,
        bus: handle,
        cancel,
        tasks,
    })
}

// ── Line task ────────────────────────────────────────────────────

struct LineTask {
    endpoint: LinkEndpoint,
    port: WirePort,
    line: LineSide,
    control: mpsc::Receiver<Control>,
    status: watch::Sender<LinkStatus>,
    cancel: CancellationToken,
}

impl LineTask {
    async fn run(mut self) -> Result<(), SerwbError> {
        let role = self.endpoint.role();
        let mut tx_raw: RawWord = 0;
        let mut clocks: u64 = 0;

        loop {
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.port.send(tx_raw) => sent,
            };
            let rx_raw = match sent {
                Ok(()) => tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    raw = self.port.recv() => raw,
                },
                Err(_) => None,
            };
            let Some(rx_raw) = rx_raw else {
                info!(%role, clocks, "peer gone, line stopped");
                break;
            };

            while let Ok(control) = self.control.try_recv() {
                self.endpoint.apply(control);
            }

            // Words are never decoded without room to deliver them.
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.line.rx.reserve() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let tick = self.endpoint.tick(rx_raw, &mut self.line.tx)?;
            match tick.rx_word {
                Some(word) => permit.send(RxWord {
                    generation: self.endpoint.generation(),
                    word,
                }),
                None => drop(permit),
            }
            if tick.datapath_reset || !self.endpoint.state().forwards_rx() {
                let stale = self.line.flush_tx();
                if stale > 0 {
                    debug!(%role, stale, "dropped queued transmit words");
                }
            }

            let status = self.endpoint.status();
            self.status.send_if_modified(|current| {
                let notify = notable_change(current, &status);
                *current = status;
                notify
            });

            tx_raw = tick.tx_raw;
            clocks += 1;
        }
        Ok(())
    }
}

/// Changes bus-side waiters care about. PHY bits and error counters are
/// updated without waking them.
fn notable_change(old: &LinkStatus, new: &LinkStatus) -> bool {
    old.state != new.state
        || old.generation != new.generation
        || old.offset != new.offset
        || old.scrambler_bypass != new.scrambler_bypass
}

// ── Bus task ─────────────────────────────────────────────────────

struct BusTask {
    tunnel: BusTunnel,
    bus: Option<Box<dyn Bus>>,
    packetizer: Packetizer,
    depacketizer: Depacketizer,
    side: BusSide,
    status: watch::Receiver<LinkStatus>,
    requests: Option<mpsc::Receiver<BusTransaction>>,
    /// Datapath generation the framing state belongs to.
    generation: u64,
    frame_timeout: Duration,
    /// Stop taking requests while this many words wait for the line.
    backlog: usize,
    cancel: CancellationToken,
}

impl BusTask {
    fn new(
        config: &LinkConfig,
        tunnel: BusTunnel,
        bus: Option<Box<dyn Bus>>,
        side: BusSide,
        mut status: watch::Receiver<LinkStatus>,
        requests: Option<mpsc::Receiver<BusTransaction>>,
        cancel: CancellationToken,
    ) -> Self {
        let generation = status.borrow_and_update().generation;
        Self {
            tunnel,
            bus,
            packetizer: Packetizer::new(config.framing.max_payload_words),
            depacketizer: Depacketizer::new(config.framing.max_payload_words),
            side,
            status,
            requests,
            generation,
            frame_timeout: Duration::from_millis(config.framing.frame_timeout_ms),
            backlog: 4 * config.framing.max_payload_words,
            cancel,
        }
    }

    async fn run(mut self) -> Result<(), SerwbError> {
        let mut last_rx = Instant::now();

        loop {
            let ready = self.status.borrow().state == LinkState::Ready;
            let accepting = ready
                && self.requests.is_some()
                && self.tunnel.can_accept()
                && self.packetizer.pending_words() < self.backlog;
            let read_deadline = self.tunnel.next_deadline();
            let frame_deadline = self
                .depacketizer
                .has_partial()
                .then(|| last_rx + self.frame_timeout);
            let line_tx = self.side.tx.clone();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                changed = self.status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = self.status.borrow_and_update().generation;
                    self.enter_generation(current);
                }
                rx = self.side.rx.recv() => {
                    let Some(rx) = rx else { break };
                    let Some(word) = self.take_rx(rx) else { continue };
                    last_rx = Instant::now();
                    self.depacketizer.push(word);
                    self.drain_packets().await;
                }
                permit = line_tx.reserve(), if !self.packetizer.is_idle() => {
                    let Ok(permit) = permit else { break };
                    if let Some(word) = self.packetizer.pull() {
                        permit.send(word);
                    }
                }
                txn = next_request(&mut self.requests), if accepting => match txn {
                    Some(txn) => self.tunnel.submit(txn, &mut self.packetizer),
                    None => {
                        debug!("all bus handles dropped");
                        self.requests = None;
                    }
                },
                _ = wait_until(read_deadline) => {
                    self.tunnel.expire();
                }
                _ = wait_until(frame_deadline) => {
                    self.depacketizer.expire();
                    last_rx = Instant::now();
                    self.drain_packets().await;
                }
            }
        }

        self.tunnel.on_link_reset();
        debug!(role = %self.tunnel.role(), stats = ?self.tunnel.stats(), "bus task stopped");
        Ok(())
    }

    async fn drain_packets(&mut self) {
        while let Some(packet) = self.depacketizer.next_packet() {
            self.dispatch(packet).await;
        }
    }

    async fn dispatch(&mut self, packet: Packet) {
        match self.bus.as_mut() {
            Some(bus) => {
                if let Err(e) = self.tunnel.serve(packet, &mut **bus, &mut self.packetizer).await {
                    warn!(error = %e, "request not served");
                }
            }
            None => self.tunnel.on_response(packet),
        }
    }

    /// Words decoded before the current generation are dropped. The first
    /// word of a newer one resets the framing state before it is used.
    fn take_rx(&mut self, rx: RxWord) -> Option<LinkWord> {
        if rx.generation < self.generation {
            trace!(generation = rx.generation, current = self.generation, "stale word dropped");
            return None;
        }
        self.enter_generation(rx.generation);
        Some(rx.word)
    }

    fn enter_generation(&mut self, generation: u64) {
        if generation <= self.generation {
            return;
        }
        self.generation = generation;
        debug!(
            generation,
            unsent = self.packetizer.pending_words(),
            "link reset, dropping in-flight frames"
        );
        self.packetizer.reset();
        self.depacketizer.reset();
        self.tunnel.on_link_reset();
    }
}

async fn next_request(rx: &mut Option<mpsc::Receiver<BusTransaction>>) -> Option<BusTransaction> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

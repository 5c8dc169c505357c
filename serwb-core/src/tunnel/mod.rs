//! Bus tunnelling over the framed word stream.
//!
//! A [`BusRole::Slave`] endpoint turns local [`BusTransaction`]s into
//! request records. A [`BusRole::Master`] endpoint executes the requests
//! it receives on its local [`Bus`] and answers reads. Writes are posted;
//! reads are strictly one at a time.

pub mod bus;

pub use bus::{Access, Bus, BusOp, BusTransaction, MemoryBus, byte_mask};

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::codec::Packetizer;
use crate::config::LinkConfig;
use crate::error::SerwbError;
use crate::header::BYTE_ENABLE_ALL;
use crate::message::{BusRole, Opcode};
use crate::packet::Packet;
use crate::state::PendingRead;

/// Value returned for words the local bus failed to read.
pub const BUS_ERROR_VALUE: u32 = 0xFFFF_FFFF;

/// Tunnel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    /// Write records sent or executed.
    pub writes: u64,
    /// Read records sent or executed.
    pub reads: u64,
    /// Read responses sent or matched.
    pub responses: u64,
    /// Records dropped: wrong direction, unmatched or unanswerable.
    pub dropped: u64,
}

// ── BusTunnel ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BusTunnel {
    role: BusRole,
    pending: Option<PendingRead>,
    read_timeout: Option<Duration>,
    max_burst: usize,
    stats: TunnelStats,
}

impl BusTunnel {
    pub fn new(role: BusRole, cfg: &LinkConfig) -> Self {
        Self {
            role,
            pending: None,
            read_timeout: cfg.tunnel.read_timeout_ms.map(Duration::from_millis),
            max_burst: cfg.max_burst_words(),
            stats: TunnelStats::default(),
        }
    }

    pub fn role(&self) -> BusRole {
        self.role
    }

    pub fn stats(&self) -> &TunnelStats {
        &self.stats
    }

    /// Largest number of words in one record.
    pub fn max_burst(&self) -> usize {
        self.max_burst
    }

    /// The requester can take another transaction (no read in flight).
    pub fn can_accept(&self) -> bool {
        self.pending.is_none()
    }

    pub fn pending(&self) -> Option<&PendingRead> {
        self.pending.as_ref()
    }

    // ── Requester ────────────────────────────────────────────────

    /// Queue a local transaction as request records.
    ///
    /// Writes complete as soon as they are queued. A read stays pending
    /// until its response arrives, the link resets or it times out. A
    /// transaction that cannot be queued fails through its `done` channel
    /// with the error that stopped it.
    pub fn submit(&mut self, txn: BusTransaction, out: &mut Packetizer) {
        let BusTransaction { address, op, done } = txn;
        let queued = if self.role != BusRole::Slave {
            Err(SerwbError::ProtocolViolation(
                "bus master endpoint cannot originate requests",
            ))
        } else {
            match op {
                BusOp::Write { data, byte_enable } => {
                    self.queue_writes(address, &data, byte_enable, out).map(|()| None)
                }
                BusOp::Read { count } => self.issue_read(address, count, out).map(|()| Some(count)),
            }
        };

        match queued {
            Ok(None) => {
                let _ = done.send(Ok(Vec::new()));
            }
            Ok(Some(count)) => {
                self.pending = Some(PendingRead::new(address, count, self.read_timeout, done));
            }
            Err(e) => {
                warn!(address, error = %e, "transaction rejected");
                let _ = done.send(Err(e));
            }
        }
    }

    /// Queue every chunk of a write, or none of them.
    fn queue_writes(
        &mut self,
        address: u32,
        data: &[u32],
        byte_enable: u8,
        out: &mut Packetizer,
    ) -> Result<(), SerwbError> {
        if data.is_empty() {
            return Err(SerwbError::ProtocolViolation("empty write"));
        }
        let packets = data
            .chunks(self.max_burst)
            .enumerate()
            .map(|(i, chunk)| {
                let at = address.wrapping_add((i * self.max_burst * 4) as u32);
                let mut packet = Packet::write_burst(at, chunk.to_vec())?;
                packet.header.byte_enable = byte_enable & BYTE_ENABLE_ALL;
                Ok(packet)
            })
            .collect::<Result<Vec<_>, SerwbError>>()?;
        out.push_all(&packets)?;
        for packet in &packets {
            debug!(%packet, "write posted");
        }
        self.stats.writes += packets.len() as u64;
        Ok(())
    }

    fn issue_read(&mut self, address: u32, count: usize, out: &mut Packetizer) -> Result<(), SerwbError> {
        if let Some(p) = &self.pending {
            return Err(SerwbError::ReadPending(p.address));
        }
        let oversized = SerwbError::InvalidLength {
            length: count,
            max: self.max_burst,
        };
        if count > self.max_burst {
            return Err(oversized);
        }
        let packet = Packet::read_burst(address, count).map_err(|_| oversized)?;
        out.push(&packet)?;
        debug!(%packet, "read issued");
        self.stats.reads += 1;
        Ok(())
    }

    /// Handle a record received by the requester.
    pub fn on_response(&mut self, packet: Packet) {
        if !self.role.accepts(packet.opcode()) {
            warn!(%packet, role = %self.role, "unexpected record dropped");
            self.stats.dropped += 1;
            return;
        }
        match self.pending.take() {
            Some(p) if p.matches(packet.address, packet.count()) => {
                debug!(%packet, elapsed = ?p.elapsed(), "read completed");
                self.stats.responses += 1;
                p.complete(Ok(packet.data));
            }
            other => {
                warn!(
                    %packet,
                    pending = ?other.as_ref().map(|p| p.address),
                    "unmatched read response dropped"
                );
                self.pending = other;
                self.stats.dropped += 1;
            }
        }
    }

    /// Fail the outstanding read because the link went down.
    pub fn on_link_reset(&mut self) {
        if let Some(p) = self.pending.take() {
            warn!(address = p.address, "link reset with read in flight");
            p.complete(Err(SerwbError::LinkReset));
        }
    }

    /// When the outstanding read expires, if it can.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and_then(PendingRead::expires_at)
    }

    /// Fail the outstanding read if its deadline has passed.
    pub fn expire(&mut self) -> bool {
        match self.pending.take() {
            Some(p) if p.is_expired() => {
                let waited = p.elapsed();
                warn!(address = p.address, ?waited, "read timed out");
                p.complete(Err(SerwbError::Timeout(waited)));
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    // ── Responder ────────────────────────────────────────────────

    /// Execute a received request on the local bus, queueing any response.
    pub async fn serve<B: Bus + ?Sized>(
        &mut self,
        packet: Packet,
        bus: &mut B,
        out: &mut Packetizer,
    ) -> Result<(), SerwbError> {
        if !self.role.accepts(packet.opcode()) {
            warn!(%packet, role = %self.role, "unexpected record dropped");
            self.stats.dropped += 1;
            return Ok(());
        }

        match packet.opcode() {
            Opcode::Write => {
                let be = packet.header.byte_enable;
                for (i, value) in packet.data.iter().enumerate() {
                    let at = packet.address.wrapping_add(4 * i as u32);
                    if let Err(e) = bus.write(at, *value, be).await {
                        warn!(address = at, error = %e, "local bus write failed");
                    }
                }
                self.stats.writes += 1;
                Ok(())
            }
            Opcode::Read => {
                let mut data = Vec::with_capacity(packet.count());
                for i in 0..packet.count() {
                    let at = packet.address.wrapping_add(4 * i as u32);
                    let value = match bus.read(at).await {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(address = at, error = %e, "local bus read failed");
                            BUS_ERROR_VALUE
                        }
                    };
                    data.push(value);
                }
                self.stats.reads += 1;
                let response = Packet::read_response(packet.address, data)?;
                out.push(&response)?;
                self.stats.responses += 1;
                Ok(())
            }
            Opcode::ReadResponse => Ok(()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::WordSource;
    use crate::codec::Depacketizer;
    use tokio::sync::oneshot;

    fn cfg() -> LinkConfig {
        LinkConfig::default()
    }

    fn drain(out: &mut Packetizer) -> Vec<Packet> {
        let mut dp = Depacketizer::new(cfg().framing.max_payload_words);
        let mut got = Vec::new();
        while let Some(w) = out.pull() {
            dp.push(w);
            got.extend(dp.next_packet());
        }
        got
    }

    fn txn(address: u32, op: BusOp) -> (BusTransaction, oneshot::Receiver<Result<Vec<u32>, SerwbError>>) {
        let (done, rx) = oneshot::channel();
        (BusTransaction { address, op, done }, rx)
    }

    #[tokio::test]
    async fn write_is_posted() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        let mut out = Packetizer::new(64);
        let (w, rx) = txn(0x100, BusOp::Write { data: vec![0xDEAD_BEEF], byte_enable: 0xF });
        t.submit(w, &mut out);
        assert_eq!(rx.await.unwrap().unwrap(), Vec::<u32>::new());
        assert_eq!(drain(&mut out), vec![Packet::write(0x100, 0xDEAD_BEEF, 0xF)]);
        assert!(t.can_accept());
    }

    #[tokio::test]
    async fn long_write_is_split() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        let mut out = Packetizer::new(64);
        let data: Vec<u32> = (0..100).collect();
        let (w, rx) = txn(0x1000, BusOp::Write { data, byte_enable: 0xF });
        t.submit(w, &mut out);
        assert!(rx.await.unwrap().is_ok());
        let packets = drain(&mut out);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].count(), 62);
        assert_eq!(packets[1].address, 0x1000 + 62 * 4);
        assert_eq!(packets[1].data[0], 62);
        assert_eq!(t.stats().writes, 2);
    }

    #[tokio::test]
    async fn split_write_that_does_not_fit_queues_nothing() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        // Room for a short record only: every chunk of the write fails to
        // frame, the first one included.
        let mut out = Packetizer::new(8);
        let (w, rx) = txn(0x1000, BusOp::Write { data: (0..100).collect(), byte_enable: 0xF });
        t.submit(w, &mut out);
        assert!(matches!(rx.await.unwrap(), Err(SerwbError::InvalidLength { .. })));
        assert!(out.is_idle());
        assert_eq!(t.stats().writes, 0);

        // A short write still goes through afterwards.
        let (w, rx) = txn(0x40, BusOp::Write { data: vec![5], byte_enable: 0xF });
        t.submit(w, &mut out);
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(drain(&mut out), vec![Packet::write(0x40, 5, 0xF)]);
    }

    #[tokio::test]
    async fn single_outstanding_read() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        let mut out = Packetizer::new(64);
        let (r1, rx1) = txn(0x200, BusOp::Read { count: 1 });
        t.submit(r1, &mut out);
        assert!(!t.can_accept());

        let (r2, rx2) = txn(0x300, BusOp::Read { count: 1 });
        t.submit(r2, &mut out);
        assert!(matches!(rx2.await.unwrap(), Err(SerwbError::ReadPending(0x200))));

        // Response for another address is ignored.
        t.on_response(Packet::read_response(0x204, vec![1]).unwrap());
        assert!(!t.can_accept());

        t.on_response(Packet::read_response(0x200, vec![0x55]).unwrap());
        assert_eq!(rx1.await.unwrap().unwrap(), vec![0x55]);
        assert!(t.can_accept());
        assert_eq!(t.stats().dropped, 1);
    }

    #[tokio::test]
    async fn unsolicited_response_dropped() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        t.on_response(Packet::read_response(0x200, vec![1]).unwrap());
        t.on_response(Packet::write(0, 0, 0xF));
        assert_eq!(t.stats().dropped, 2);
    }

    #[tokio::test]
    async fn link_reset_fails_pending_read() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        let mut out = Packetizer::new(64);
        let (r, rx) = txn(0x200, BusOp::Read { count: 1 });
        t.submit(r, &mut out);
        t.on_link_reset();
        assert!(matches!(rx.await.unwrap(), Err(SerwbError::LinkReset)));
        assert!(t.can_accept());
    }

    #[tokio::test]
    async fn read_deadline_expires() {
        let mut c = cfg();
        c.tunnel.read_timeout_ms = Some(1);
        let mut t = BusTunnel::new(BusRole::Slave, &c);
        let mut out = Packetizer::new(64);
        let (r, rx) = txn(0x200, BusOp::Read { count: 1 });
        t.submit(r, &mut out);
        assert!(t.next_deadline().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(t.expire());
        assert!(matches!(rx.await.unwrap(), Err(SerwbError::Timeout(_))));
    }

    #[tokio::test]
    async fn oversized_read_rejected() {
        let mut t = BusTunnel::new(BusRole::Slave, &cfg());
        let mut out = Packetizer::new(64);
        let (r, rx) = txn(0, BusOp::Read { count: 63 });
        t.submit(r, &mut out);
        assert!(matches!(
            rx.await.unwrap(),
            Err(SerwbError::InvalidLength { length: 63, max: 62 })
        ));
        assert!(t.can_accept());
        assert!(out.is_idle());
    }

    #[tokio::test]
    async fn responder_executes_and_answers() {
        let mut t = BusTunnel::new(BusRole::Master, &cfg());
        let mut bus = MemoryBus::new();
        let mut out = Packetizer::new(64);

        t.serve(Packet::write(0x100, 0xDEAD_BEEF, 0xF), &mut bus, &mut out).await.unwrap();
        t.serve(Packet::write(0x100, 0x0000_0011, 0x1), &mut bus, &mut out).await.unwrap();
        assert!(out.is_idle());
        assert_eq!(bus.peek(0x100).await, 0xDEAD_BE11);

        t.serve(Packet::read_burst(0x100, 2).unwrap(), &mut bus, &mut out).await.unwrap();
        assert_eq!(
            drain(&mut out),
            vec![Packet::read_response(0x100, vec![0xDEAD_BE11, 0]).unwrap()]
        );
    }

    #[tokio::test]
    async fn responder_refuses_requests_from_local_side() {
        let mut t = BusTunnel::new(BusRole::Master, &cfg());
        let mut out = Packetizer::new(64);
        let (w, rx) = txn(0, BusOp::Write { data: vec![1], byte_enable: 0xF });
        t.submit(w, &mut out);
        assert!(matches!(rx.await.unwrap(), Err(SerwbError::ProtocolViolation(_))));
        assert!(out.is_idle());
    }
}

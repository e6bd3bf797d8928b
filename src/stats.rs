use std::sync::atomic::{AtomicU64, Ordering};

/// Controller-wide traffic counters.
#[derive(Debug, Default)]
pub struct ControllerStats {
    packet_in_count: AtomicU64,
    packet_in_bytes: AtomicU64,
    packet_out_count: AtomicU64,
    packet_out_bytes: AtomicU64,
    messages_rx: AtomicU64,
    messages_tx: AtomicU64,
    dropped_events: AtomicU64,
    parse_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub packet_in_count: u64,
    pub packet_in_bytes: u64,
    pub packet_out_count: u64,
    pub packet_out_bytes: u64,
    pub messages_rx: u64,
    pub messages_tx: u64,
    pub dropped_events: u64,
    pub parse_errors: u64,
}

impl ControllerStats {
    pub fn new() -> ControllerStats {
        ControllerStats::default()
    }

    pub fn record_rx(&self) {
        self.messages_rx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self) {
        self.messages_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_in(&self, bytes: usize) {
        self.packet_in_count.fetch_add(1, Ordering::Relaxed);
        self.packet_in_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_packet_out(&self, bytes: usize) {
        self.packet_out_count.fetch_add(1, Ordering::Relaxed);
        self.packet_out_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packet_in_count: self.packet_in_count.load(Ordering::Relaxed),
            packet_in_bytes: self.packet_in_bytes.load(Ordering::Relaxed),
            packet_out_count: self.packet_out_count.load(Ordering::Relaxed),
            packet_out_bytes: self.packet_out_bytes.load(Ordering::Relaxed),
            messages_rx: self.messages_rx.load(Ordering::Relaxed),
            messages_tx: self.messages_tx.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.packet_in_count,
            &self.packet_in_bytes,
            &self.packet_out_count,
            &self.packet_out_bytes,
            &self.messages_rx,
            &self.messages_tx,
            &self.dropped_events,
            &self.parse_errors,
        ]
        .iter()
        {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

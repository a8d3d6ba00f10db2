use serde::Serialize;

/// Message counters for one communication manager
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    /// Envelope bytes written to and read from transports
    pub bytes_transferred: u64,
    /// Mean of envelope timestamp to transmit time
    pub average_latency_ms: f64,
    pub active_connections: usize,
    pub last_activity: Option<u64>,
    #[serde(skip)]
    latency_samples: u64,
}

impl CommMetrics {
    pub fn record_sent(&mut self, now: u64) {
        self.messages_sent += 1;
        self.last_activity = Some(now);
    }

    pub fn record_received(&mut self, bytes: usize, now: u64) {
        self.messages_received += 1;
        self.bytes_transferred += bytes as u64;
        self.last_activity = Some(now);
    }

    pub fn record_delivered(&mut self, bytes: usize, latency_ms: u64, now: u64) {
        self.messages_delivered += 1;
        self.bytes_transferred += bytes as u64;
        self.latency_samples += 1;
        self.average_latency_ms +=
            (latency_ms as f64 - self.average_latency_ms) / self.latency_samples as f64;
        self.last_activity = Some(now);
    }

    pub fn record_failed(&mut self) {
        self.messages_failed += 1;
    }
}

/**
 * Coherence Bus Core (§4.H)
 *
 * DESIGN DECISION: a thin façade over the broker (§4.A) that fixes one
 * method per channel instead of a generic `publish(channel, ...)`
 * WHY: producers and consumers should never need to know a channel's name
 * string — `publish_mutation`/`publish_alert`/`publish_validation`/
 * `publish_fragment` each bind to their one fixed channel, matching §4.G/
 * §4.F's call sites exactly. Health/metrics are grounded on
 * `realtime_sync/server.rs`'s `ServerState::health_check`/`stats_endpoint`
 * pair, generalized from one WebSocket server's connection stats to the
 * whole bus's per-channel/per-breaker state.
 */

pub mod broker;
pub mod envelope;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::circuit_breaker::BreakerState;
use crate::config::options::ScbConfig;
use crate::error::Result;

pub use broker::StreamBroker;
pub use envelope::{Channel, Envelope, Priority};

const LATENCY_SAMPLE_CAP: usize = 1_000;

/// Per-breaker/per-channel snapshot returned by `health()` (§4.H, §7).
#[derive(Debug, Clone, Serialize)]
pub struct BusHealth {
    pub breaker_state: BreakerState,
    pub channel_lengths: HashMap<String, usize>,
    pub channel_caps: HashMap<String, usize>,
}

/// Throughput/latency/error snapshot returned by `metrics()` (§4.H targets:
/// p95 publish <= 50ms, throughput >= 10,000 msg/s, availability >= 99.9%).
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub total_published: u64,
    pub total_errors: u64,
    pub p95_publish_latency_ms: f64,
    pub uptime_seconds: u64,
}

/// Façade tying the broker (§4.A) and its circuit breaker (§4.B) together
/// behind the four fixed publish/subscribe pairs, plus health and metrics.
pub struct CoherenceBus {
    broker: StreamBroker,
    config: ScbConfig,
    started_at: Instant,
    total_published: AtomicU64,
    total_errors: AtomicU64,
    latency_samples_ms: Mutex<Vec<f64>>,
}

impl CoherenceBus {
    pub fn new(config: ScbConfig) -> Self {
        let channel_options: HashMap<Channel, crate::config::options::ChannelOptions> = config
            .channels
            .iter()
            .filter_map(|(name, opts)| Channel::parse(name).map(|c| (c, *opts)))
            .collect();
        let broker = StreamBroker::new(channel_options, &config.circuit_breaker);
        Self {
            broker,
            config,
            started_at: Instant::now(),
            total_published: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            latency_samples_ms: Mutex::new(Vec::new()),
        }
    }

    pub fn broker(&self) -> &StreamBroker {
        &self.broker
    }

    async fn publish(&self, envelope: Envelope) -> Result<u64> {
        let start = Instant::now();
        let result = self.broker.publish(envelope).await;
        self.record_latency(start.elapsed());
        match &result {
            Ok(_) => {
                self.total_published.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn record_latency(&self, elapsed: Duration) {
        let mut samples = self.latency_samples_ms.lock().expect("latency samples lock poisoned");
        if samples.len() >= LATENCY_SAMPLE_CAP {
            samples.remove(0);
        }
        samples.push(elapsed.as_secs_f64() * 1000.0);
    }

    /// Publish a mutation proposal onto `context_mutations` (§4.F step 1).
    ///
    /// `correlation_id`, when given, is also used as the envelope's
    /// `message_id`: resubmitting the same mutation (same id) lands in the
    /// broker's dedup window instead of enqueuing a second copy, matching
    /// "handlers must be idempotent on message_id" at the producer side too.
    pub async fn publish_mutation(
        &self,
        payload: serde_json::Value,
        source_service: &str,
        correlation_id: Option<Uuid>,
    ) -> Result<u64> {
        let mut envelope = Envelope::new(Channel::ContextMutations, "mutation_proposed", payload, source_service);
        if let Some(id) = correlation_id {
            envelope.message_id = id;
        }
        envelope.correlation_id = correlation_id;
        self.publish(envelope).await
    }

    /// Publish a validation/rejection outcome onto `semantic_validation`
    /// (§4.F step 3, §7 "terminal rejects surfaced via semantic_validation").
    pub async fn publish_validation(
        &self,
        payload: serde_json::Value,
        source_service: &str,
        correlation_id: Option<Uuid>,
    ) -> Result<u64> {
        let mut envelope =
            Envelope::new(Channel::SemanticValidation, "validation_outcome", payload, source_service);
        envelope.correlation_id = correlation_id;
        self.publish(envelope).await
    }

    /// Publish a coherence alert onto `coherence_alerts`, at `High` priority
    /// for critical kinds per §7 ("emit on coherence_alerts at priority 1").
    pub async fn publish_alert(
        &self,
        payload: serde_json::Value,
        source_service: &str,
        priority: Priority,
    ) -> Result<u64> {
        let envelope =
            Envelope::new(Channel::CoherenceAlerts, "coherence_alert", payload, source_service)
                .with_priority(priority);
        self.publish(envelope).await
    }

    /// Publish a fragment update onto `fragment_updates`, keyed by agent
    /// kind in the payload (§4.G step 5).
    pub async fn publish_fragment(&self, payload: serde_json::Value, source_service: &str) -> Result<u64> {
        let envelope = Envelope::new(Channel::FragmentUpdates, "fragment_update", payload, source_service);
        self.publish(envelope).await
    }

    /// Pull a batch from any of the four channels for a named consumer
    /// group, bounded at <=10 messages / 5s block (§4.A).
    pub async fn subscribe(
        &self,
        channel: Channel,
        group: &str,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<(u64, Envelope)>> {
        self.broker.poll_batch(channel, group, max_batch, block).await
    }

    pub fn ack(&self, channel: Channel, group: &str, offset: u64) {
        self.broker.ack(channel, group, offset);
    }

    /// `health()` (§4.H, §7): per-breaker state, per-channel length/cap.
    pub fn health(&self) -> BusHealth {
        let channel_lengths = Channel::ALL
            .into_iter()
            .map(|c| (c.as_str().to_string(), self.broker.channel_len(c)))
            .collect();
        let channel_caps = self
            .config
            .channels
            .iter()
            .map(|(name, opts)| (name.clone(), opts.max_len))
            .collect();
        BusHealth { breaker_state: self.broker.breaker().state(), channel_lengths, channel_caps }
    }

    /// `metrics()` (§4.H): throughput counters, error counts, p95 latency.
    pub fn metrics(&self) -> BusMetrics {
        let samples = self.latency_samples_ms.lock().expect("latency samples lock poisoned");
        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p95 = if sorted.is_empty() {
            0.0
        } else {
            let idx = ((sorted.len() as f64) * 0.95).floor() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        BusMetrics {
            total_published: self.total_published.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            p95_publish_latency_ms: p95,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

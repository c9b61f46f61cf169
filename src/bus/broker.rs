/**
 * Stream Broker Client (§4.A)
 *
 * DESIGN DECISION: an in-process, bounded per-channel log (`VecDeque`)
 * guarded by a `Mutex`, with consumer-group offsets in a `DashMap`, instead
 * of a network round-trip to an external broker
 * WHY: §1 scopes the bus as the core itself, not a thin client to Kafka/
 * Redis Streams; the spec's contract (ordered append, consumer groups,
 * at-least-once, bounded retention) is exactly what an in-process structure
 * can provide with zero network latency, which is what lets the pipeline
 * hit the p95 <= 50ms publish target (§4.H). Grounded on
 * `realtime_sync/server.rs`'s `ServerState` connection/broadcast model,
 * generalized from "broadcast to connected WebSocket clients" to "append to
 * a replayable per-channel log with offset-tracked consumer groups."
 */

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::options::{ChannelOptions, CircuitBreakerOptions};
use crate::error::{Error, Result};

use super::envelope::{Channel, Envelope};

struct ChannelLog {
    entries: VecDeque<(u64, Envelope)>,
    next_offset: u64,
    max_len: usize,
}

impl ChannelLog {
    fn new(max_len: usize) -> Self {
        Self { entries: VecDeque::new(), next_offset: 0, max_len }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn push(&mut self, envelope: Envelope) -> u64 {
        if self.entries.len() >= self.max_len {
            self.entries.pop_front();
        }
        let offset = self.next_offset;
        self.next_offset += 1;
        self.entries.push_back((offset, envelope));
        offset
    }

    fn trim(&mut self, max_len: usize) {
        while self.entries.len() > max_len {
            self.entries.pop_front();
        }
    }

    fn from_offset(&self, offset: u64, limit: usize) -> Vec<(u64, Envelope)> {
        self.entries
            .iter()
            .filter(|(o, _)| *o >= offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn tail_offset(&self) -> u64 {
        self.next_offset
    }
}

/// `(channel, consumer_group)` key for offset tracking.
type GroupKey = (Channel, String);

/// Ordered, replayable, bounded per-channel message log with consumer-group
/// offsets and idempotent publish (§4.A).
pub struct StreamBroker {
    logs: HashMap<Channel, Mutex<ChannelLog>>,
    channel_options: HashMap<Channel, ChannelOptions>,
    group_offsets: DashMap<GroupKey, u64>,
    dead_letters: DashMap<Channel, Vec<Envelope>>,
    delivery_attempts: DashMap<(GroupKey, u64), u32>,
    seen_message_ids: DashMap<Uuid, Instant>,
    breaker: CircuitBreaker,
    timeout_window_s: u64,
}

impl StreamBroker {
    pub fn new(
        channel_options: HashMap<Channel, ChannelOptions>,
        breaker_options: &CircuitBreakerOptions,
    ) -> Self {
        let logs = channel_options
            .iter()
            .map(|(channel, opts)| (*channel, Mutex::new(ChannelLog::new(opts.max_len))))
            .collect();
        Self {
            logs,
            channel_options,
            group_offsets: DashMap::new(),
            dead_letters: DashMap::new(),
            delivery_attempts: DashMap::new(),
            seen_message_ids: DashMap::new(),
            breaker: CircuitBreaker::new("bus", breaker_options),
            timeout_window_s: breaker_options.timeout_window_s,
        }
    }

    fn max_len(&self, channel: Channel) -> usize {
        self.channel_options.get(&channel).map(|o| o.max_len).unwrap_or(usize::MAX)
    }

    /// `publish(channel, payload, priority, ttl) -> offset` (§4.A).
    ///
    /// Idempotent on `envelope.message_id`: a duplicate within the TTL
    /// dedup window is accepted without re-appending and returns the
    /// original offset is not tracked (callers don't need it for a retry),
    /// matching "handlers must be idempotent on message_id" by making
    /// publish itself a no-op on replay.
    pub async fn publish(&self, envelope: Envelope) -> Result<u64> {
        self.breaker.guard().map_err(|_| {
            Error::BusUnavailable(format!("circuit open for channel {}", envelope.channel.as_str()))
        })?;

        self.prune_seen_ids();
        if self.seen_message_ids.contains_key(&envelope.message_id) {
            debug!(message_id = %envelope.message_id, "duplicate publish ignored");
            return Ok(0);
        }

        let max_len = self.max_len(envelope.channel);
        let current_len = self.len(envelope.channel);
        let ratio = current_len as f64 / max_len as f64;

        if ratio >= 1.0 {
            self.breaker.record_failure();
            return Err(Error::BusBackpressure(envelope.channel.as_str().to_string()));
        }
        if ratio >= 0.8 {
            let cap = Duration::from_secs(self.timeout_window_s / 4);
            let linear = cap.mul_f64((ratio - 0.8) / 0.2);
            warn!(channel = envelope.channel.as_str(), ratio, "channel near capacity, delaying publish");
            tokio::time::sleep(linear.min(cap)).await;
        }

        let log = self.logs.get(&envelope.channel).ok_or_else(|| {
            Error::UnknownChannel(envelope.channel.as_str().to_string())
        })?;
        let message_id = envelope.message_id;
        let offset = {
            let mut log = log.lock().expect("channel log lock poisoned");
            log.push(envelope)
        };
        self.seen_message_ids.insert(message_id, Instant::now());
        self.breaker.record_success();
        Ok(offset)
    }

    fn len(&self, channel: Channel) -> usize {
        self.logs
            .get(&channel)
            .map(|log| log.lock().expect("channel log lock poisoned").len())
            .unwrap_or(0)
    }

    /// `trim(channel, max_len)`: evict oldest entries beyond `max_len`.
    pub fn trim(&self, channel: Channel, max_len: usize) {
        if let Some(log) = self.logs.get(&channel) {
            log.lock().expect("channel log lock poisoned").trim(max_len);
        }
    }

    /// Pull up to `max_batch` (<=10 per §4.A) undelivered messages for
    /// `(channel, group)`, blocking up to `block` if none are yet available.
    pub async fn poll_batch(
        &self,
        channel: Channel,
        group: &str,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<(u64, Envelope)>> {
        let max_batch = max_batch.min(10);
        let deadline = Instant::now() + block;
        loop {
            let offset = self.group_offset(channel, group);
            let log = self.logs.get(&channel).ok_or_else(|| {
                Error::UnknownChannel(channel.as_str().to_string())
            })?;
            let batch = log.lock().expect("channel log lock poisoned").from_offset(offset, max_batch);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn group_offset(&self, channel: Channel, group: &str) -> u64 {
        *self.group_offsets.get(&(channel, group.to_string())).map(|v| *v).get_or_insert(0)
    }

    /// Ack successful delivery, advancing the group's offset past it.
    pub fn ack(&self, channel: Channel, group: &str, offset: u64) {
        let key = (channel, group.to_string());
        self.group_offsets.insert(key.clone(), offset + 1);
        self.delivery_attempts.remove(&(key, offset));
    }

    /// Record a failed handler invocation; returns `true` once `max_attempts`
    /// is reached and the message has been dead-lettered (§4.A).
    pub fn record_failure_and_maybe_dead_letter(
        &self,
        channel: Channel,
        group: &str,
        offset: u64,
        envelope: &Envelope,
        max_attempts: u32,
    ) -> bool {
        let key = (channel, group.to_string());
        let attempts = {
            let mut entry = self.delivery_attempts.entry((key.clone(), offset)).or_insert(0);
            *entry += 1;
            *entry
        };
        if attempts >= max_attempts {
            self.dead_letters.entry(channel).or_default().push(envelope.clone());
            self.ack(channel, group, offset);
            warn!(channel = channel.as_str(), offset, "message dead-lettered after max attempts");
            true
        } else {
            false
        }
    }

    pub fn dead_letters(&self, channel: Channel) -> Vec<Envelope> {
        self.dead_letters.get(&channel).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn channel_len(&self, channel: Channel) -> usize {
        self.len(channel)
    }

    pub fn tail_offset(&self, channel: Channel) -> u64 {
        self.logs
            .get(&channel)
            .map(|log| log.lock().expect("channel log lock poisoned").tail_offset())
            .unwrap_or(0)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn prune_seen_ids(&self) {
        let cutoff = Duration::from_secs(3600);
        self.seen_message_ids.retain(|_, seen_at| seen_at.elapsed() < cutoff);
    }
}

impl Default for StreamBroker {
    /// Broker configured with the four fixed channels at their spec-default
    /// caps/retention (§4.A) and a default circuit breaker.
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert(Channel::ContextMutations, ChannelOptions { max_len: 10_000, retention_days: 7 });
        channels.insert(Channel::SemanticValidation, ChannelOptions { max_len: 5_000, retention_days: 3 });
        channels.insert(Channel::CoherenceAlerts, ChannelOptions { max_len: 1_000, retention_days: 30 });
        channels.insert(Channel::FragmentUpdates, ChannelOptions { max_len: 20_000, retention_days: 14 });
        Self::new(channels, &CircuitBreakerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with_cap(max_len: usize) -> StreamBroker {
        let mut channels = HashMap::new();
        channels.insert(Channel::ContextMutations, ChannelOptions { max_len, retention_days: 1 });
        StreamBroker::new(channels, &CircuitBreakerOptions { timeout_window_s: 4, ..CircuitBreakerOptions::default() })
    }

    fn envelope() -> Envelope {
        Envelope::new(Channel::ContextMutations, "mutation_proposed", serde_json::json!({}), "test")
    }

    #[tokio::test]
    async fn publish_then_poll_returns_the_message() {
        let broker = broker_with_cap(10);
        broker.publish(envelope()).await.unwrap();

        let batch = broker
            .poll_batch(Channel::ContextMutations, "workers", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn ack_advances_group_offset_past_delivered_message() {
        let broker = broker_with_cap(10);
        broker.publish(envelope()).await.unwrap();
        let batch = broker
            .poll_batch(Channel::ContextMutations, "workers", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let (offset, _) = batch[0].clone();
        broker.ack(Channel::ContextMutations, "workers", offset);

        let next = broker
            .poll_batch(Channel::ContextMutations, "workers", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn duplicate_message_id_is_published_exactly_once() {
        let broker = broker_with_cap(10);
        let mut env = envelope();
        env.message_id = Uuid::nil();
        broker.publish(env.clone()).await.unwrap();
        broker.publish(env).await.unwrap();
        assert_eq!(broker.channel_len(Channel::ContextMutations), 1);
    }

    #[tokio::test]
    async fn channel_at_full_capacity_rejects_with_backpressure() {
        let broker = broker_with_cap(2);
        broker.publish(envelope()).await.unwrap();
        broker.publish(envelope()).await.unwrap();
        let result = broker.publish(envelope()).await;
        assert!(matches!(result, Err(Error::BusBackpressure(_))));
    }

    #[tokio::test]
    async fn max_len_reached_trims_oldest_before_appending() {
        let broker = broker_with_cap(2);
        // fill then ack so the next publish below the hard backpressure
        // check still exercises the ring-buffer eviction path directly.
        {
            let log = broker.logs.get(&Channel::ContextMutations).unwrap();
            let mut log = log.lock().unwrap();
            log.push(envelope());
            log.push(envelope());
            let first_offset = log.entries.front().unwrap().0;
            log.push(envelope());
            assert!(log.entries.front().unwrap().0 > first_offset);
            assert_eq!(log.len(), 2);
        }
    }

    #[tokio::test]
    async fn repeated_failures_dead_letter_after_max_attempts() {
        let broker = broker_with_cap(10);
        broker.publish(envelope()).await.unwrap();
        let batch = broker
            .poll_batch(Channel::ContextMutations, "workers", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let (offset, env) = batch[0].clone();

        assert!(!broker.record_failure_and_maybe_dead_letter(Channel::ContextMutations, "workers", offset, &env, 3));
        assert!(!broker.record_failure_and_maybe_dead_letter(Channel::ContextMutations, "workers", offset, &env, 3));
        assert!(broker.record_failure_and_maybe_dead_letter(Channel::ContextMutations, "workers", offset, &env, 3));
        assert_eq!(broker.dead_letters(Channel::ContextMutations).len(), 1);
    }
}

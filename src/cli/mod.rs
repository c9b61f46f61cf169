/**
 * Admin CLI (§6)
 *
 * DESIGN DECISION: a thin `AdminCli` facade over `CoherenceBus`/`KnowledgeStore`,
 * with `scb-admin`'s `main` doing nothing but argv parsing and exit-code
 * mapping, instead of baking argument parsing into the library
 * WHY: the admin surface is "administrative, not part of the core hot
 * path" (§6); keeping it a plain struct with one method per subcommand lets
 * it be unit-tested directly (no subprocess) and mirrors the teacher's
 * `cli::config::ConfigCli` split between CLI-facing methods and the
 * argv-parsing binary that calls them. No `clap`: five fixed subcommands
 * don't earn a parser dependency the rest of the crate has no other use for.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bus::CoherenceBus;
use crate::error::{Error, ErrorClass, Result};
use crate::store::KnowledgeStore;

/// Exit codes per §6: 0 ok; 2 misuse; 3 store corruption; 4 bus unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    Misuse = 2,
    StoreCorruption = 3,
    BusUnavailable = 4,
}

impl ExitCode {
    /// Classify a failed admin command's error into one of §6's exit codes.
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::Corruption(_) | Error::StoreUnavailable(_) => ExitCode::StoreCorruption,
            Error::BusUnavailable(_) | Error::BusBackpressure(_) | Error::CircuitOpen(_) => {
                ExitCode::BusUnavailable
            }
            _ if err.classify() == ErrorClass::Terminal => ExitCode::Misuse,
            _ => ExitCode::Misuse,
        }
    }
}

/// Administrative operations over a running bus/store pair (§6 CLI surface).
pub struct AdminCli {
    bus: Arc<CoherenceBus>,
    store: Arc<KnowledgeStore>,
}

impl AdminCli {
    pub fn new(bus: Arc<CoherenceBus>, store: Arc<KnowledgeStore>) -> Self {
        Self { bus, store }
    }

    /// `bus status`: per-breaker state, per-channel length/cap, throughput.
    pub fn bus_status(&self) -> Result<String> {
        let health = self.bus.health();
        let metrics = self.bus.metrics();
        let mut lines = vec![format!("breaker: {:?}", health.breaker_state)];
        for channel in crate::bus::Channel::ALL {
            let name = channel.as_str();
            let len = health.channel_lengths.get(name).copied().unwrap_or(0);
            let cap = health.channel_caps.get(name).copied().unwrap_or(0);
            lines.push(format!("  {name}: {len}/{cap}"));
        }
        lines.push(format!(
            "published={} errors={} p95_ms={:.2} uptime_s={}",
            metrics.total_published, metrics.total_errors, metrics.p95_publish_latency_ms, metrics.uptime_seconds
        ));
        Ok(lines.join("\n"))
    }

    /// `bus replay --from-offset N`: dump `fragment_updates` entries at or
    /// after `from_offset` without consuming them (no ack), for operator
    /// inspection during an incident.
    pub async fn bus_replay(&self, from_offset: u64) -> Result<String> {
        let tail = self.bus.broker().tail_offset(crate::bus::Channel::FragmentUpdates);
        if from_offset > tail {
            return Err(Error::SchemaInvalid(format!(
                "from-offset {from_offset} is past the channel tail ({tail})"
            )));
        }
        let batch = self
            .bus
            .subscribe(
                crate::bus::Channel::FragmentUpdates,
                &format!("replay-{from_offset}"),
                10,
                std::time::Duration::from_millis(0),
            )
            .await?;
        let lines: Vec<String> = batch
            .into_iter()
            .map(|(offset, envelope)| format!("{offset}: {}", envelope.message_type))
            .collect();
        Ok(lines.join("\n"))
    }

    /// `store snapshot`: force a snapshot outside the usual every-N-commits cadence.
    pub fn store_snapshot(&self) -> Result<PathBuf> {
        self.store.snapshot()
    }

    /// `store restore <file>`: load an explicit snapshot file over the current tree.
    pub fn store_restore(&self, path: &Path) -> Result<()> {
        self.store.restore(path)
    }

    /// `circuit reset <name>`: administrative override back to Closed.
    ///
    /// The bus currently exposes one named breaker (`"bus"`, guarding the
    /// broker's publish path); unrecognized names are a misuse error rather
    /// than a silent no-op.
    pub fn circuit_reset(&self, name: &str) -> Result<()> {
        let breaker = self.bus.broker().breaker();
        if breaker.name() != name {
            return Err(Error::SchemaInvalid(format!("unknown circuit breaker: {name}")));
        }
        breaker.force_reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScbConfig;

    fn cli() -> AdminCli {
        let bus = Arc::new(CoherenceBus::new(ScbConfig::default()));
        let store = Arc::new(KnowledgeStore::in_memory().unwrap());
        AdminCli::new(bus, store)
    }

    #[test]
    fn bus_status_reports_all_four_channels() {
        let cli = cli();
        let status = cli.bus_status().unwrap();
        assert!(status.contains("context_mutations"));
        assert!(status.contains("fragment_updates"));
    }

    #[tokio::test]
    async fn bus_replay_past_tail_is_rejected_as_misuse() {
        let cli = cli();
        let err = cli.bus_replay(1_000).await.unwrap_err();
        assert_eq!(ExitCode::for_error(&err), ExitCode::Misuse);
    }

    #[test]
    fn store_snapshot_on_in_memory_store_fails_without_a_directory() {
        let cli = cli();
        let err = cli.store_snapshot().unwrap_err();
        assert_eq!(ExitCode::for_error(&err), ExitCode::Misuse);
    }

    #[test]
    fn circuit_reset_rejects_an_unknown_breaker_name() {
        let cli = cli();
        let err = cli.circuit_reset("not-a-breaker").unwrap_err();
        assert_eq!(ExitCode::for_error(&err), ExitCode::Misuse);
    }

    #[test]
    fn circuit_reset_clears_the_bus_breaker() {
        let cli = cli();
        cli.circuit_reset("bus").unwrap();
    }
}

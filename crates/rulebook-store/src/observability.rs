//! Tracing and metrics wiring.
//!
//! # Purpose
//! Installs a `tracing` subscriber for binaries and tests that embed the
//! adapter, and names the counters the adapter emits.
//!
//! # Notes
//! Initialization is guarded by `OnceLock` so repeated calls (and tests that
//! race to initialize) are harmless. Metrics go through the `metrics` facade;
//! exporting them is the embedding application's choice.
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub const RULES_WRITTEN_TOTAL: &str = "rulebook_rules_written_total";
pub const RULES_REMOVED_TOTAL: &str = "rulebook_rules_removed_total";
pub const RULES_LOADED: &str = "rulebook_rules_loaded";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}

pub(crate) fn record_written(op: &'static str, rows: u64) {
    metrics::counter!(RULES_WRITTEN_TOTAL, "op" => op).increment(rows);
}

pub(crate) fn record_removed(op: &'static str, rows: u64) {
    metrics::counter!(RULES_REMOVED_TOTAL, "op" => op).increment(rows);
}

pub(crate) fn record_loaded(rows: usize) {
    metrics::gauge!(RULES_LOADED).set(rows as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("tracing initialized twice");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_written("add", 2);
        record_removed("remove", 1);
        record_loaded(3);
    }
}

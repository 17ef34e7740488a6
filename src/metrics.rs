//! Observability for statement execution and batched loading.
//!
//! Every statement a [`Query`](crate::Query) runs goes through [`observe`],
//! which opens a `tracing` span (feature `tracing`), times the call, logs it
//! at debug level and records Prometheus metrics (feature `metrics`).

use crate::Result;
use std::time::Instant;

#[cfg(feature = "metrics")]
pub use prometheus_metrics::{TidelineMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use prometheus::{
        exponential_buckets, histogram_opts, opts, HistogramVec, IntCounterVec, Registry,
    };
    use std::time::Duration;

    pub static METRICS: Lazy<TidelineMetrics> = Lazy::new(TidelineMetrics::init);

    /// Prometheus collectors, registered on their own [`Registry`]
    pub struct TidelineMetrics {
        pub registry: Registry,
        pub statements_total: IntCounterVec,
        pub statement_errors_total: IntCounterVec,
        pub statement_duration: HistogramVec,
        pub batch_loads_total: IntCounterVec,
        pub batch_sources: HistogramVec,
    }

    impl TidelineMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();

            let statements_total = IntCounterVec::new(
                opts!("tideline_statements_total", "Total statements executed"),
                &["kind", "table"],
            )
            .expect("metric can be created");

            let statement_errors_total = IntCounterVec::new(
                opts!("tideline_statement_errors_total", "Statements that failed"),
                &["kind", "table"],
            )
            .expect("metric can be created");

            let statement_duration = HistogramVec::new(
                histogram_opts!(
                    "tideline_statement_duration_seconds",
                    "Duration of statements",
                    exponential_buckets(0.0005, 2.0, 14).expect("valid buckets")
                ),
                &["kind"],
            )
            .expect("metric can be created");

            let batch_loads_total = IntCounterVec::new(
                opts!("tideline_batch_loads_total", "Batched relation loads"),
                &["relation"],
            )
            .expect("metric can be created");

            let batch_sources = HistogramVec::new(
                histogram_opts!(
                    "tideline_batch_sources",
                    "Source entities resolved per batched load",
                    exponential_buckets(1.0, 4.0, 8).expect("valid buckets")
                ),
                &["relation"],
            )
            .expect("metric can be created");

            for collector in [
                Box::new(statements_total.clone()) as Box<dyn prometheus::core::Collector>,
                Box::new(statement_errors_total.clone()),
                Box::new(statement_duration.clone()),
                Box::new(batch_loads_total.clone()),
                Box::new(batch_sources.clone()),
            ] {
                registry
                    .register(collector)
                    .expect("metric can be registered");
            }

            Self {
                registry,
                statements_total,
                statement_errors_total,
                statement_duration,
                batch_loads_total,
                batch_sources,
            }
        }

        pub fn record_statement(&self, kind: &str, table: &str, elapsed: Duration, ok: bool) {
            self.statements_total.with_label_values(&[kind, table]).inc();
            if !ok {
                self.statement_errors_total
                    .with_label_values(&[kind, table])
                    .inc();
            }
            self.statement_duration
                .with_label_values(&[kind])
                .observe(elapsed.as_secs_f64());
        }

        pub fn record_batch(&self, relation: &str, sources: usize) {
            self.batch_loads_total.with_label_values(&[relation]).inc();
            self.batch_sources
                .with_label_values(&[relation])
                .observe(sources as f64);
        }
    }
}

/// Span constructors used around statements, transactions and batched loads
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    pub fn statement_span(kind: &str, table: &str) -> Span {
        tracing::debug_span!("tideline.statement", kind = %kind, table = %table)
    }

    pub fn batch_load_span(relation: &str, sources: usize) -> Span {
        tracing::debug_span!("tideline.batch_load", relation = %relation, sources)
    }

    pub fn begin_transaction_span() -> Span {
        tracing::debug_span!("tideline.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        tracing::debug_span!("tideline.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        tracing::debug_span!("tideline.transaction.rollback")
    }

    pub fn acquire_connection_span() -> Span {
        tracing::debug_span!("tideline.connection.acquire")
    }
}

/// Run one statement with span, timing, debug log and metrics around it.
pub(crate) fn observe<T>(kind: &'static str, table: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::statement_span(kind, table).entered();

    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();

    #[cfg(feature = "metrics")]
    METRICS.record_statement(kind, table, elapsed, result.is_ok());

    match &result {
        Ok(_) => log::debug!("{kind} on {table} took {elapsed:?}"),
        Err(e) => log::debug!("{kind} on {table} failed after {elapsed:?}: {e}"),
    }
    result
}

/// Record one batched relation load.
pub(crate) fn batch_loaded(relation: &str, sources: usize, found: usize) {
    log::debug!("batched load of {relation}: {sources} source(s), {found} row(s)");
    #[cfg(feature = "metrics")]
    METRICS.record_batch(relation, sources);
}

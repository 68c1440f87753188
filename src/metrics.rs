//! Migration metrics and tracing spans.
//!
//! Both halves are feature-gated. With `metrics` enabled, instruments are
//! registered on the global OpenTelemetry meter provider; the host application
//! decides where they are exported. With `tracing` enabled, the engine wraps
//! lock acquisition, runs, unit applications and statements in spans.

#[cfg(feature = "metrics")]
pub use self::otel::{MigrationMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use std::time::Duration;

    pub static METRICS: Lazy<MigrationMetrics> = Lazy::new(MigrationMetrics::init);

    pub struct MigrationMetrics {
        pub migrations_applied: Counter<u64>,
        pub migration_failures: Counter<u64>,
        pub migration_duration: Histogram<f64>,
        pub lock_wait: Histogram<f64>,
    }

    impl MigrationMetrics {
        pub fn init() -> Self {
            let meter = global::meter("tidemark");

            let migrations_applied = meter
                .u64_counter("tidemark_migrations_applied_total")
                .with_description("Migration units applied successfully")
                .build();

            let migration_failures = meter
                .u64_counter("tidemark_migration_failures_total")
                .with_description("Migration units that failed and left the store dirty")
                .build();

            let migration_duration = meter
                .f64_histogram("tidemark_migration_duration_seconds")
                .with_description("Time spent applying a single migration unit")
                .with_unit("s")
                .build();

            let lock_wait = meter
                .f64_histogram("tidemark_lock_wait_seconds")
                .with_description("Time spent waiting for the migration lock")
                .with_unit("s")
                .build();

            Self {
                migrations_applied,
                migration_failures,
                migration_duration,
                lock_wait,
            }
        }

        pub fn record_applied(&self, version: i64, elapsed: Duration) {
            let attrs = [KeyValue::new("version", version)];
            self.migrations_applied.add(1, &attrs);
            self.migration_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_failure(&self, version: i64) {
            self.migration_failures.add(1, &[KeyValue::new("version", version)]);
        }

        pub fn record_lock_wait(&self, waited: Duration) {
            self.lock_wait.record(waited.as_secs_f64(), &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{span, Level, Span};

    /// Longest statement prefix recorded on a span
    const STATEMENT_PREVIEW: usize = 120;

    pub fn execute_statement_span(statement: &str) -> Span {
        let preview: String = statement.trim().chars().take(STATEMENT_PREVIEW).collect();
        span!(Level::TRACE, "tidemark.statement", sql = %preview)
    }

    pub fn begin_transaction_span() -> Span {
        span!(Level::DEBUG, "tidemark.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        span!(Level::DEBUG, "tidemark.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        span!(Level::DEBUG, "tidemark.transaction.rollback")
    }

    pub fn acquire_lock_span() -> Span {
        span!(Level::DEBUG, "tidemark.lock.acquire")
    }

    pub fn migrate_up_span(source: &str) -> Span {
        span!(Level::INFO, "tidemark.up", source = %source)
    }

    pub fn apply_migration_span(version: i64, name: &str) -> Span {
        span!(Level::INFO, "tidemark.apply", version, name = %name)
    }
}

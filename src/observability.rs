use tracing_subscriber::EnvFilter;

// ── Request-driven metrics ──────────────────────────────────────

/// Counter: appointments stored (single and batch).
pub const APPOINTMENTS_CREATED_TOTAL: &str = "slotkeeper_appointments_created_total";

/// Counter: appointments edited or moved between sellers.
pub const APPOINTMENTS_UPDATED_TOTAL: &str = "slotkeeper_appointments_updated_total";

/// Counter: appointments deleted.
pub const APPOINTMENTS_DELETED_TOTAL: &str = "slotkeeper_appointments_deleted_total";

/// Counter: candidates refused by the conflict check. Labels: reason.
pub const REJECTIONS_TOTAL: &str = "slotkeeper_rejections_total";

/// Counter: status transitions applied. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "slotkeeper_status_changes_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Install the fmt subscriber. `RUST_LOG` overrides the `default` directive.
pub fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

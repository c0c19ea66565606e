use ulid::Ulid;

use crate::model::{AppointmentStatus, Span};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    /// The seller already has a scheduled appointment touching the window.
    #[error("seller {seller_id} has no availability in that window (conflicts with {existing})")]
    Conflict { seller_id: Ulid, existing: Ulid },

    #[error("invalid interval: end {} is before start {}", .0.end, .0.start)]
    InvalidInterval(Span),

    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict { .. } => "conflict",
            EngineError::InvalidInterval(_) => "invalid_interval",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

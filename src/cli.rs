//! `slotkeeper` subcommands. The binary parses arguments and maps the
//! [`Outcome`] to an exit code; everything else lives here.

use std::error::Error;
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use ulid::Ulid;

use crate::config::Config;
use crate::engine::{Engine, EngineError};
use crate::model::{Appointment, Ms, Span};
use crate::schema::APPOINTMENT_FIELDS;

/// `slotkeeper` command arguments. Storage settings come from the environment.
#[derive(Debug, Parser)]
#[command(name = "slotkeeper", about = "Inspect and maintain seller appointments", version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Would this window be free for the seller? Writes nothing.
    Check {
        #[arg(long)]
        seller: Ulid,
        /// RFC 3339, e.g. 2026-01-05T10:00:00Z
        #[arg(long, value_parser = parse_timestamp)]
        start: Ms,
        #[arg(long, value_parser = parse_timestamp)]
        end: Ms,
        /// Check as an edit of this stored appointment.
        #[arg(long, value_name = "appointment id")]
        exclude: Option<Ulid>,
    },
    /// Print scheduled appointments in a window as JSON lines.
    Calendar {
        #[arg(long)]
        seller: Option<Ulid>,
        #[arg(long, value_parser = parse_timestamp)]
        from: Ms,
        #[arg(long, value_parser = parse_timestamp)]
        to: Ms,
    },
    /// Report stored scheduled appointments that overlap.
    Audit,
    /// Rewrite the log once it has grown past the configured threshold.
    Compact {
        /// Compact regardless of the threshold.
        #[arg(long)]
        force: bool,
    },
    /// Print the appointment field schema as JSON.
    Schema,
}

/// Whether the command found something the operator should act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    /// Window unavailable, or stored conflicts found.
    Flagged,
}

pub fn parse_timestamp(raw: &str) -> Result<Ms, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

pub fn format_timestamp(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Run one subcommand against the data directory in `config`, writing its
/// report to `out`. Must be called inside a Tokio runtime.
pub async fn run(
    command: Command,
    config: &Config,
    out: &mut impl Write,
) -> Result<Outcome, Box<dyn Error>> {
    if let Command::Schema = command {
        writeln!(out, "{}", serde_json::to_string_pretty(&APPOINTMENT_FIELDS)?)?;
        return Ok(Outcome::Clean);
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Engine::new(config.wal_path())?;

    match command {
        Command::Check {
            seller,
            start,
            end,
            exclude,
        } => {
            let id = exclude.unwrap_or_else(Ulid::new);
            let candidate = Appointment::scheduled(id, seller, Span::new(start, end));
            match engine.check(&candidate).await {
                Ok(()) => {
                    writeln!(out, "available")?;
                    Ok(Outcome::Clean)
                }
                Err(e @ (EngineError::Conflict { .. } | EngineError::InvalidInterval(_))) => {
                    writeln!(out, "unavailable: {e}")?;
                    Ok(Outcome::Flagged)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Calendar { seller, from, to } => {
            for entry in engine.calendar(seller, Span::new(from, to)).await? {
                let line = serde_json::json!({
                    "id": entry.id,
                    "seller": entry.seller_id,
                    "start": format_timestamp(entry.start),
                    "end": format_timestamp(entry.end),
                    "title": entry.title,
                });
                writeln!(out, "{line}")?;
            }
            Ok(Outcome::Clean)
        }
        Command::Audit => {
            let conflicts = engine.find_conflicts().await;
            for c in &conflicts {
                writeln!(out, "{}", serde_json::to_string(c)?)?;
            }
            info!(
                appointments = engine.appointment_count(),
                conflicts = conflicts.len(),
                "audit finished"
            );
            Ok(if conflicts.is_empty() {
                Outcome::Clean
            } else {
                Outcome::Flagged
            })
        }
        Command::Compact { force } => {
            let compacted = if force {
                engine.compact_wal().await?;
                true
            } else {
                engine.compact_if_needed(config.compact_threshold).await?
            };
            writeln!(out, "{}", if compacted { "compacted" } else { "below threshold" })?;
            Ok(Outcome::Clean)
        }
        Command::Schema => Ok(Outcome::Clean),
    }
}

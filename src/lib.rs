//! Appointment storage that refuses to double-book a seller.
//!
//! A scheduled appointment occupies its seller for the closed interval
//! `[start, end]`. [`engine::check_no_conflict`] enforces that no two
//! scheduled appointments of one seller intersect, against any store that
//! implements [`engine::AppointmentLookup`]. [`engine::Engine`] is the
//! durable store, serializing check-and-write per seller.

pub mod cli;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod schema;
pub mod wal;

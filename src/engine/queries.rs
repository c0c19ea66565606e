use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schema::{CalendarEntry, APPOINTMENT_CALENDAR};

use super::conflict::{check_no_conflict, scan_conflicts, validate_span, StoredConflict};
use super::{Engine, EngineError, SharedSchedule};

fn validate_window(window: &Span) -> Result<(), EngineError> {
    if !window.is_ordered() {
        return Err(EngineError::InvalidInterval(*window));
    }
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    /// Dry-run the conflict check for `candidate` against stored state.
    /// Nothing is written. A candidate carrying a stored appointment's id is
    /// checked as an edit of that appointment.
    pub async fn check(&self, candidate: &Appointment) -> Result<(), EngineError> {
        validate_span(&candidate.span)?;
        match self.get_schedule(&candidate.seller_id) {
            Some(schedule) => check_no_conflict(candidate, &*schedule.read().await),
            None => check_no_conflict(candidate, &SellerSchedule::new(candidate.seller_id)),
        }
    }

    pub async fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        let seller_id = self.get_seller_for_appointment(id)?;
        let schedule = self.get_schedule(&seller_id)?;
        let guard = schedule.read().await;
        guard.get(*id).cloned()
    }

    /// A seller's appointments of any status, in start order, optionally
    /// limited to those touching `window`.
    pub async fn list_appointments(
        &self,
        seller_id: Ulid,
        window: Option<Span>,
    ) -> Result<Vec<Appointment>, EngineError> {
        if let Some(w) = &window {
            validate_window(w)?;
        }
        let schedule = match self.get_schedule(&seller_id) {
            Some(s) => s,
            None => return Ok(vec![]),
        };
        let guard = schedule.read().await;
        match window {
            Some(w) => Ok(guard.overlapping(&w).cloned().collect()),
            None => Ok(guard.appointments.clone()),
        }
    }

    /// Calendar entries touching `window`: scheduled appointments only, one
    /// seller or all of them, sorted by start.
    pub async fn calendar(
        &self,
        seller_id: Option<Ulid>,
        window: Span,
    ) -> Result<Vec<CalendarEntry>, EngineError> {
        validate_window(&window)?;
        let schedules: Vec<SharedSchedule> = match seller_id {
            Some(id) => self.get_schedule(&id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let mut entries = Vec::new();
        for schedule in schedules {
            let guard = schedule.read().await;
            entries.extend(
                guard
                    .overlapping(&window)
                    .filter_map(|a| APPOINTMENT_CALENDAR.entry(a)),
            );
        }
        entries.sort_by_key(|e| (e.start, e.id));
        Ok(entries)
    }

    /// Scan storage for overlapping scheduled pairs. The engine never creates
    /// them; a log written by another tool can.
    pub async fn find_conflicts(&self) -> Vec<StoredConflict> {
        let schedules: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for schedule in schedules {
            found.extend(scan_conflicts(&*schedule.read().await));
        }
        found
    }

    pub fn seller_ids(&self) -> Vec<Ulid> {
        self.state.iter().map(|e| *e.key()).collect()
    }
}

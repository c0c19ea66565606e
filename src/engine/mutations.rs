use std::collections::{BTreeMap, BTreeSet, HashSet};

use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_batch_disjoint, check_no_conflict, validate_span};
use super::{apply_to_schedule, Engine, EngineError, WalCommand};

fn validate_fields(
    span: &Span,
    client_name: Option<&str>,
    description: Option<&str>,
) -> Result<(), EngineError> {
    validate_span(span)?;
    if client_name.is_some_and(|n| n.chars().count() > MAX_CLIENT_NAME_LEN) {
        return Err(EngineError::LimitExceeded("client name too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

fn validate_appointment(appt: &Appointment) -> Result<(), EngineError> {
    validate_fields(
        &appt.span,
        appt.client_name.as_deref(),
        appt.description.as_deref(),
    )
}

/// Conflict check with the rejection counted and logged.
fn guard_conflict(candidate: &Appointment, schedule: &SellerSchedule) -> Result<(), EngineError> {
    check_no_conflict(candidate, schedule).inspect_err(|e| {
        metrics::counter!(observability::REJECTIONS_TOTAL, "reason" => e.kind()).increment(1);
        debug!(
            appointment = %candidate.id,
            seller = %candidate.seller_id,
            start = candidate.span.start,
            end = candidate.span.end,
            "candidate rejected: {e}"
        );
    })
}

impl Engine {
    /// Validate and store a new appointment. Scheduled appointments must not
    /// overlap any scheduled appointment of the same seller.
    pub async fn create_appointment(&self, appt: Appointment) -> Result<(), EngineError> {
        validate_appointment(&appt)?;
        let _gate = self.compaction_gate.read().await;
        let schedule = self.schedule_for(appt.seller_id);
        let mut guard = schedule.write().await;
        if self.entity_to_seller.contains_key(&appt.id) {
            return Err(EngineError::AlreadyExists(appt.id));
        }
        if guard.len() >= MAX_APPOINTMENTS_PER_SELLER {
            return Err(EngineError::LimitExceeded("too many appointments for seller"));
        }
        guard_conflict(&appt, &guard)?;

        let (id, seller_id) = (appt.id, appt.seller_id);
        let event = Event::AppointmentCreated { appointment: appt };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::APPOINTMENTS_CREATED_TOTAL).increment(1);
        info!(appointment = %id, seller = %seller_id, "appointment created");
        Ok(())
    }

    /// Replace an appointment's seller, span and descriptive fields. The
    /// record is re-checked against everyone but itself.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, EngineError> {
        validate_fields(
            &update.span,
            update.client_name.as_deref(),
            update.description.as_deref(),
        )?;
        let _gate = self.compaction_gate.read().await;
        loop {
            let current_seller = self
                .get_seller_for_appointment(&id)
                .ok_or(EngineError::NotFound(id))?;
            let attempt = if current_seller == update.seller_id {
                self.update_in_place(id, current_seller, &update).await?
            } else {
                self.move_to_seller(id, current_seller, &update).await?
            };
            // None: another writer moved the appointment while we waited.
            if let Some(updated) = attempt {
                return Ok(updated);
            }
        }
    }

    async fn update_in_place(
        &self,
        id: Ulid,
        seller_id: Ulid,
        update: &AppointmentUpdate,
    ) -> Result<Option<Appointment>, EngineError> {
        let schedule = self
            .get_schedule(&seller_id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = schedule.write_owned().await;
        let Some(current) = guard.get(id) else {
            return if self.entity_to_seller.contains_key(&id) {
                Ok(None)
            } else {
                Err(EngineError::NotFound(id))
            };
        };
        let updated = update.apply_to(current);
        guard_conflict(&updated, &guard)?;
        let event = Event::AppointmentUpdated {
            appointment: updated.clone(),
            previous_seller_id: seller_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::APPOINTMENTS_UPDATED_TOTAL).increment(1);
        info!(appointment = %id, seller = %seller_id, "appointment updated");
        Ok(Some(updated))
    }

    /// Lock both schedules in id order, then move.
    async fn move_to_seller(
        &self,
        id: Ulid,
        current_seller: Ulid,
        update: &AppointmentUpdate,
    ) -> Result<Option<Appointment>, EngineError> {
        let new_seller = update.seller_id;
        let from = self.schedule_for(current_seller);
        let to = self.schedule_for(new_seller);
        let (mut from_guard, mut to_guard) = if current_seller < new_seller {
            let f = from.write_owned().await;
            (f, to.write_owned().await)
        } else {
            let t = to.write_owned().await;
            (from.write_owned().await, t)
        };

        let Some(current) = from_guard.get(id) else {
            return if self.entity_to_seller.contains_key(&id) {
                Ok(None)
            } else {
                Err(EngineError::NotFound(id))
            };
        };
        let updated = update.apply_to(current);
        if to_guard.len() >= MAX_APPOINTMENTS_PER_SELLER {
            return Err(EngineError::LimitExceeded("too many appointments for seller"));
        }
        guard_conflict(&updated, &to_guard)?;

        let event = Event::AppointmentUpdated {
            appointment: updated.clone(),
            previous_seller_id: current_seller,
        };
        self.wal_append(&event).await?;
        from_guard.remove(id);
        apply_to_schedule(&mut to_guard, &event, &self.entity_to_seller);
        metrics::counter!(observability::APPOINTMENTS_UPDATED_TOTAL).increment(1);
        info!(
            appointment = %id,
            from = %current_seller,
            to = %new_seller,
            "appointment moved to another seller"
        );
        Ok(Some(updated))
    }

    /// Move a scheduled appointment to `Finished` or `Canceled`. Setting the
    /// current status again is a no-op. Transitions never conflict-check.
    pub async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let seller_id = guard.seller_id;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?.status;
        if current == status {
            return Ok(seller_id);
        }
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current,
                to: status,
            });
        }

        let event = Event::StatusChanged { id, seller_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::STATUS_CHANGES_TOTAL, "status" => status.as_str())
            .increment(1);
        info!(appointment = %id, seller = %seller_id, %status, "appointment status changed");
        Ok(seller_id)
    }

    pub async fn delete_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let seller_id = guard.seller_id;
        let event = Event::AppointmentDeleted { id, seller_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::APPOINTMENTS_DELETED_TOTAL).increment(1);
        info!(appointment = %id, seller = %seller_id, "appointment deleted");
        Ok(seller_id)
    }

    /// Create several appointments at once. All-or-nothing: if any one is
    /// invalid or conflicts, with storage or with another in the batch, none
    /// are stored.
    pub async fn batch_create(&self, appts: Vec<Appointment>) -> Result<(), EngineError> {
        if appts.is_empty() {
            return Ok(());
        }
        if appts.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut seen = HashSet::new();
        for appt in &appts {
            validate_appointment(appt)?;
            if !seen.insert(appt.id) {
                return Err(EngineError::AlreadyExists(appt.id));
            }
        }
        check_batch_disjoint(&appts)?;

        let _gate = self.compaction_gate.read().await;
        // Acquire write locks in sorted order to prevent deadlocks.
        let seller_ids: BTreeSet<Ulid> = appts.iter().map(|a| a.seller_id).collect();
        let mut guards = BTreeMap::new();
        for seller_id in seller_ids {
            guards.insert(seller_id, self.schedule_for(seller_id).write_owned().await);
        }

        // Phase 1: validate everything against current state.
        for appt in &appts {
            if self.entity_to_seller.contains_key(&appt.id) {
                return Err(EngineError::AlreadyExists(appt.id));
            }
            let Some(guard) = guards.get(&appt.seller_id) else {
                return Err(EngineError::NotFound(appt.seller_id));
            };
            if guard.len() >= MAX_APPOINTMENTS_PER_SELLER {
                return Err(EngineError::LimitExceeded("too many appointments for seller"));
            }
            guard_conflict(appt, guard)?;
        }

        // Phase 2: one log write for the whole batch, then apply.
        let count = appts.len();
        let events: Vec<Event> = appts
            .into_iter()
            .map(|appointment| Event::AppointmentCreated { appointment })
            .collect();
        self.wal_append_all(events.clone()).await?;
        for event in &events {
            if let Some(guard) = guards.get_mut(&event.seller_id()) {
                apply_to_schedule(guard, event, &self.entity_to_seller);
            }
        }
        metrics::counter!(observability::APPOINTMENTS_CREATED_TOTAL).increment(count as u64);
        info!(count, sellers = guards.len(), "appointment batch created");
        Ok(())
    }

    /// Rewrite the log as the minimal event set that recreates current state.
    /// Writers are shut out until the new log is in place, so no mutation can
    /// slip in between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut schedules: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        schedules.sort_by_key(|(seller_id, _)| *seller_id);

        let mut guards = Vec::with_capacity(schedules.len());
        for (_, schedule) in schedules {
            guards.push(schedule.read_owned().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .flat_map(|g| g.appointments.iter())
            .map(|a| Event::AppointmentCreated {
                appointment: a.clone(),
            })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx })
            .await?;
        Self::wal_reply(rx).await?;
        drop(guards);
        info!(events = count, "appointment log compacted");
        Ok(())
    }

    /// Compact once more than `threshold` appends piled up. Returns whether
    /// it compacted.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, EngineError> {
        let appends = self.wal_appends_since_compact().await;
        if appends < threshold {
            debug!(appends, threshold, "compaction not needed");
            return Ok(false);
        }
        self.compact_wal().await?;
        Ok(true)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span, AppointmentLookup};
use super::EngineError;

/// Volatile, synchronous appointment store.
///
/// Check and insert run while the seller's map entry is held, so concurrent
/// writers for the same seller are serialized.
pub struct InMemoryStore {
    schedules: DashMap<Ulid, SellerSchedule>,
    entity_to_seller: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            schedules: DashMap::new(),
            entity_to_seller: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entity_to_seller.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_to_seller.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Appointment> {
        let seller_id = *self.entity_to_seller.get(id)?.value();
        self.schedules.get(&seller_id)?.value().get(*id).cloned()
    }

    pub fn insert(&self, appt: Appointment) -> Result<(), EngineError> {
        validate_span(&appt.span)?;
        // The id stays claimed only if the insert goes through; dropping a
        // vacant entry leaves the map untouched.
        let Entry::Vacant(claim) = self.entity_to_seller.entry(appt.id) else {
            return Err(EngineError::AlreadyExists(appt.id));
        };
        let mut schedule = self
            .schedules
            .entry(appt.seller_id)
            .or_insert_with(|| SellerSchedule::new(appt.seller_id));
        if schedule.len() >= MAX_APPOINTMENTS_PER_SELLER {
            return Err(EngineError::LimitExceeded("too many appointments for seller"));
        }
        check_no_conflict(&appt, &*schedule)?;
        claim.insert(appt.seller_id);
        schedule.insert(appt);
        Ok(())
    }

    pub fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<(), EngineError> {
        let seller_id = *self
            .entity_to_seller
            .get(&id)
            .ok_or(EngineError::NotFound(id))?
            .value();
        let mut schedule = self
            .schedules
            .get_mut(&seller_id)
            .ok_or(EngineError::NotFound(id))?;
        let current = schedule.get(id).ok_or(EngineError::NotFound(id))?.status;
        if current == status {
            return Ok(());
        }
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { id, from: current, to: status });
        }
        schedule.set_status(id, status);
        Ok(())
    }

    pub fn remove(&self, id: &Ulid) -> Option<Appointment> {
        let (_, seller_id) = self.entity_to_seller.remove(id)?;
        self.schedules.get_mut(&seller_id)?.value_mut().remove(*id)
    }
}

impl AppointmentLookup for InMemoryStore {
    fn find(
        &self,
        seller_id: Ulid,
        status: AppointmentStatus,
        start_before_or_eq: Ms,
        end_after_or_eq: Ms,
    ) -> Vec<Appointment> {
        match self.schedules.get(&seller_id) {
            Some(schedule) => schedule.find(seller_id, status, start_before_or_eq, end_after_or_eq),
            None => Vec::new(),
        }
    }
}

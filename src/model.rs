use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Closed interval `[start, end]`. Both endpoints belong to the span, so two
/// spans that merely touch are considered overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Unchecked constructor. Ordering is validated where spans enter the
    /// engine, so callers can build a reversed span and get a proper error.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Finished,
    Canceled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 3] = [Self::Scheduled, Self::Finished, Self::Canceled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Finished => "Finished",
            Self::Canceled => "Canceled",
        }
    }

    /// Only scheduled appointments occupy their seller's time.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Scheduled)
    }

    /// `Scheduled → Finished` and `Scheduled → Canceled` are the only moves.
    /// Finished and canceled appointments are terminal.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Finished) | (Self::Scheduled, Self::Canceled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown appointment status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A seller's time-bounded appointment with a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub seller_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub client_name: Option<String>,
    pub description: Option<String>,
    /// Free-form duration as entered; not derived from `span`.
    pub duration: Option<Ms>,
}

impl Appointment {
    /// A scheduled appointment with no descriptive fields.
    pub fn scheduled(id: Ulid, seller_id: Ulid, span: Span) -> Self {
        Self {
            id,
            seller_id,
            span,
            status: AppointmentStatus::Scheduled,
            client_name: None,
            description: None,
            duration: None,
        }
    }

    pub fn with_client(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = Some(client_name.into());
        self
    }

    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        self.status = status;
        self
    }
}

/// Replacement values for an existing appointment. Status is changed through
/// its own transition operation, never through an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentUpdate {
    pub seller_id: Ulid,
    pub span: Span,
    pub client_name: Option<String>,
    pub description: Option<String>,
    pub duration: Option<Ms>,
}

impl AppointmentUpdate {
    pub fn from_appointment(appt: &Appointment) -> Self {
        Self {
            seller_id: appt.seller_id,
            span: appt.span,
            client_name: appt.client_name.clone(),
            description: appt.description.clone(),
            duration: appt.duration,
        }
    }

    pub(crate) fn apply_to(&self, appt: &Appointment) -> Appointment {
        Appointment {
            id: appt.id,
            seller_id: self.seller_id,
            span: self.span,
            status: appt.status,
            client_name: self.client_name.clone(),
            description: self.description.clone(),
            duration: self.duration,
        }
    }
}

/// All appointments of one seller, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct SellerSchedule {
    pub seller_id: Ulid,
    pub appointments: Vec<Appointment>,
}

impl SellerSchedule {
    pub fn new(seller_id: Ulid) -> Self {
        Self {
            seller_id,
            appointments: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, appt: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.span.start <= appt.span.start);
        self.appointments.insert(pos, appt);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn set_status(&mut self, id: Ulid, status: AppointmentStatus) -> bool {
        match self.appointments.iter_mut().find(|a| a.id == id) {
            Some(appt) => {
                appt.status = status;
                true
            }
            None => false,
        }
    }

    /// Appointments whose closed span intersects `query`.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start <= query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end >= query.start)
    }
}

/// Log record format: flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentCreated {
        appointment: Appointment,
    },
    /// Full replacement. `previous_seller_id` differs from the new seller
    /// when the appointment was moved to someone else.
    AppointmentUpdated {
        appointment: Appointment,
        previous_seller_id: Ulid,
    },
    StatusChanged {
        id: Ulid,
        seller_id: Ulid,
        status: AppointmentStatus,
    },
    AppointmentDeleted {
        id: Ulid,
        seller_id: Ulid,
    },
}

impl Event {
    pub fn seller_id(&self) -> Ulid {
        match self {
            Event::AppointmentCreated { appointment } | Event::AppointmentUpdated { appointment, .. } => {
                appointment.seller_id
            }
            Event::StatusChanged { seller_id, .. } | Event::AppointmentDeleted { seller_id, .. } => {
                *seller_id
            }
        }
    }
}

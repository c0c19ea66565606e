//! Declarative description of the appointment record for listing and
//! calendar collaborators.

use serde::Serialize;
use ulid::Ulid;

use crate::model::{Appointment, AppointmentStatus, Ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Data,
    Datetime,
    Time,
    #[serde(rename = "Small Text")]
    SmallText,
    Link,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub fieldname: &'static str,
    pub fieldtype: FieldType,
    pub label: &'static str,
    /// Link target, or newline-separated choices for a select.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'static str>,
}

impl FieldDef {
    const fn new(fieldname: &'static str, fieldtype: FieldType, label: &'static str) -> Self {
        Self {
            fieldname,
            fieldtype,
            label,
            options: None,
        }
    }

    const fn with_options(mut self, options: &'static str) -> Self {
        self.options = Some(options);
        self
    }
}

pub static APPOINTMENT_FIELDS: [FieldDef; 7] = [
    FieldDef::new("client_name", FieldType::Data, "Client Name"),
    FieldDef::new("start_date", FieldType::Datetime, "Start Date"),
    FieldDef::new("end_date", FieldType::Datetime, "End Date"),
    FieldDef::new("duration", FieldType::Time, "Duration"),
    FieldDef::new("description", FieldType::SmallText, "Description"),
    FieldDef::new("seller", FieldType::Link, "Seller").with_options("User"),
    FieldDef::new("status", FieldType::Select, "Status").with_options("Scheduled\nFinished\nCanceled"),
];

pub fn field(name: &str) -> Option<&'static FieldDef> {
    APPOINTMENT_FIELDS.iter().find(|f| f.fieldname == name)
}

/// Which record fields a calendar shows, and which records it shows at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarView {
    pub start: &'static str,
    pub end: &'static str,
    pub title: &'static str,
    pub status: AppointmentStatus,
}

pub const APPOINTMENT_CALENDAR: CalendarView = CalendarView {
    start: "start_date",
    end: "end_date",
    title: "client_name",
    status: AppointmentStatus::Scheduled,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub id: Ulid,
    pub seller_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub title: String,
}

impl CalendarView {
    /// Project an appointment onto the calendar, or `None` if the view's
    /// status filter hides it.
    pub fn entry(&self, appt: &Appointment) -> Option<CalendarEntry> {
        if appt.status != self.status {
            return None;
        }
        Some(CalendarEntry {
            id: appt.id,
            seller_id: appt.seller_id,
            start: appt.span.start,
            end: appt.span.end,
            title: appt.client_name.clone().unwrap_or_default(),
        })
    }
}

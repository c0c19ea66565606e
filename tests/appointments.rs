use std::cell::RefCell;
use std::sync::Arc;

use ulid::Ulid;

use slotkeeper::config::Config;
use slotkeeper::engine::{check_no_conflict, AppointmentLookup, Engine, EngineError, InMemoryStore};
use slotkeeper::model::{Appointment, AppointmentStatus, AppointmentUpdate, Ms, Span};
use slotkeeper::schema;

const HOUR: Ms = 3_600_000;
/// 2026-01-05T00:00:00Z
const DAY: Ms = 1_767_571_200_000;

fn window(start_h: f64, end_h: f64) -> Span {
    Span::new(
        DAY + (start_h * HOUR as f64) as Ms,
        DAY + (end_h * HOUR as f64) as Ms,
    )
}

/// A caller-owned store: a flat list plus a record of the queries made.
#[derive(Default)]
struct RecordingStore {
    rows: Vec<Appointment>,
    queries: RefCell<Vec<(Ulid, AppointmentStatus, Ms, Ms)>>,
}

impl AppointmentLookup for RecordingStore {
    fn find(
        &self,
        seller_id: Ulid,
        status: AppointmentStatus,
        start_before_or_eq: Ms,
        end_after_or_eq: Ms,
    ) -> Vec<Appointment> {
        self.queries
            .borrow_mut()
            .push((seller_id, status, start_before_or_eq, end_after_or_eq));
        self.rows
            .iter()
            .filter(|a| {
                a.seller_id == seller_id
                    && a.status == status
                    && a.span.start <= start_before_or_eq
                    && a.span.end >= end_after_or_eq
            })
            .cloned()
            .collect()
    }
}

#[test]
fn checker_works_against_any_lookup() {
    let r = Ulid::new();
    let booked = Appointment::scheduled(Ulid::new(), r, window(10.0, 11.0));
    let store = RecordingStore {
        rows: vec![booked.clone()],
        ..Default::default()
    };

    let candidate = Appointment::scheduled(Ulid::new(), r, window(10.5, 10.75));
    let err = check_no_conflict(&candidate, &store).unwrap_err();
    assert!(matches!(err, EngineError::Conflict { existing, .. } if existing == booked.id));

    // One query, asking for scheduled records that start by the candidate's
    // end and end at or after its start.
    let queries = store.queries.borrow();
    assert_eq!(
        queries.as_slice(),
        &[(r, AppointmentStatus::Scheduled, candidate.span.end, candidate.span.start)]
    );
}

#[test]
fn checker_skips_lookup_for_inactive_candidates() {
    let store = RecordingStore::default();
    let candidate = Appointment::scheduled(Ulid::new(), Ulid::new(), window(10.0, 11.0))
        .with_status(AppointmentStatus::Canceled);
    check_no_conflict(&candidate, &store).unwrap();
    assert!(store.queries.borrow().is_empty());
}

#[test]
fn in_memory_store_follows_booking_rules() {
    let store = InMemoryStore::new();
    let r = Ulid::new();
    let s = Ulid::new();

    store
        .insert(Appointment::scheduled(Ulid::new(), r, window(10.0, 11.0)))
        .unwrap();
    for span in [window(10.5, 10.75), window(11.0, 12.0), window(9.0, 10.0)] {
        let result = store.insert(Appointment::scheduled(Ulid::new(), r, span));
        assert!(matches!(result, Err(EngineError::Conflict { .. })), "{span:?}");
    }
    store
        .insert(Appointment::scheduled(Ulid::new(), s, window(10.5, 10.75)))
        .unwrap();
    let reversed = store.insert(Appointment::scheduled(Ulid::new(), s, window(12.0, 11.0)));
    assert!(matches!(reversed, Err(EngineError::InvalidInterval(_))));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn engine_survives_restart_from_config_dir() {
    let dir = std::env::temp_dir().join(format!("slotkeeper_it_{}", Ulid::new()));
    let dir_str = dir.display().to_string();
    let config = Config::from_lookup(|key| match key {
        "SLOTKEEPER_DATA_DIR" => Some(dir_str.clone()),
        _ => None,
    });
    std::fs::create_dir_all(&config.data_dir).unwrap();

    let r = Ulid::new();
    let s = Ulid::new();
    let appt = Appointment::scheduled(Ulid::new(), r, window(10.0, 11.0)).with_client("Ines");
    {
        let engine = Arc::new(Engine::new(config.wal_path()).unwrap());
        engine.create_appointment(appt.clone()).await.unwrap();
        let mut update = AppointmentUpdate::from_appointment(&appt);
        update.seller_id = s;
        update.span = window(13.0, 14.0);
        engine.update_appointment(appt.id, update).await.unwrap();
    }

    let engine = Engine::new(config.wal_path()).unwrap();
    let stored = engine.get_appointment(&appt.id).await.unwrap();
    assert_eq!(stored.seller_id, s);
    assert_eq!(stored.span, window(13.0, 14.0));
    assert_eq!(stored.client_name.as_deref(), Some("Ines"));

    let entries = engine.calendar(None, window(0.0, 24.0)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "Ines");
    assert_eq!(entries[0].seller_id, s);

    // r is free at 10:00 again; s is taken at 13:30.
    engine
        .check(&Appointment::scheduled(Ulid::new(), r, window(10.0, 11.0)))
        .await
        .unwrap();
    let busy = engine
        .check(&Appointment::scheduled(Ulid::new(), s, window(13.5, 15.0)))
        .await;
    assert!(matches!(busy, Err(EngineError::Conflict { .. })));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn schema_describes_the_record() {
    let status = schema::field("status").unwrap();
    assert_eq!(status.fieldtype, schema::FieldType::Select);
    let choices: Vec<&str> = status.options.unwrap().lines().collect();
    let expected: Vec<&str> = AppointmentStatus::ALL.iter().map(|s| s.as_str()).collect();
    assert_eq!(choices, expected);

    assert_eq!(schema::field("seller").and_then(|f| f.options), Some("User"));
    assert!(schema::field("room").is_none());
}

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Read access to previously stored appointments. This is all the conflict
/// check needs from whatever owns persistence.
pub trait AppointmentLookup {
    /// Appointments of `seller_id` with the given status where
    /// `start <= start_before_or_eq` and `end >= end_after_or_eq`.
    fn find(
        &self,
        seller_id: Ulid,
        status: AppointmentStatus,
        start_before_or_eq: Ms,
        end_after_or_eq: Ms,
    ) -> Vec<Appointment>;
}

impl AppointmentLookup for SellerSchedule {
    fn find(
        &self,
        seller_id: Ulid,
        status: AppointmentStatus,
        start_before_or_eq: Ms,
        end_after_or_eq: Ms,
    ) -> Vec<Appointment> {
        if seller_id != self.seller_id {
            return Vec::new();
        }
        // overlapping() takes a query span; the two bounds map onto its ends.
        let query = Span::new(end_after_or_eq, start_before_or_eq);
        self.overlapping(&query)
            .filter(|a| a.status == status)
            .cloned()
            .collect()
    }
}

/// A pair of scheduled appointments found overlapping in storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredConflict {
    pub seller_id: Ulid,
    pub first: Ulid,
    pub second: Ulid,
}

/// Span ordering plus the accepted timestamp range.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if !span.is_ordered() {
        return Err(EngineError::InvalidInterval(*span));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Reject `candidate` if its seller already has a scheduled appointment whose
/// closed span intersects the candidate's. The candidate's own stored record
/// (same id) never counts against it, so re-validating an unchanged update
/// passes.
///
/// Candidates that are not `Scheduled` cannot break the non-overlap invariant
/// and pass without a lookup.
pub fn check_no_conflict(
    candidate: &Appointment,
    existing: &impl AppointmentLookup,
) -> Result<(), EngineError> {
    if !candidate.span.is_ordered() {
        return Err(EngineError::InvalidInterval(candidate.span));
    }
    if !candidate.status.is_blocking() {
        return Ok(());
    }
    let blocking = existing
        .find(
            candidate.seller_id,
            AppointmentStatus::Scheduled,
            candidate.span.end,
            candidate.span.start,
        )
        .into_iter()
        .find(|other| other.id != candidate.id);
    match blocking {
        Some(other) => Err(EngineError::Conflict {
            seller_id: candidate.seller_id,
            existing: other.id,
        }),
        None => Ok(()),
    }
}

/// Check a batch of candidates against each other. Only same-seller scheduled
/// pairs can conflict.
pub(crate) fn check_batch_disjoint(batch: &[Appointment]) -> Result<(), EngineError> {
    for (i, a) in batch.iter().enumerate() {
        if !a.status.is_blocking() {
            continue;
        }
        for b in &batch[i + 1..] {
            if b.status.is_blocking() && a.seller_id == b.seller_id && a.span.overlaps(&b.span) {
                return Err(EngineError::Conflict {
                    seller_id: b.seller_id,
                    existing: a.id,
                });
            }
        }
    }
    Ok(())
}

/// Sweep a schedule for scheduled appointments that overlap each other.
/// Each offending appointment is reported once, paired with the earlier
/// appointment reaching furthest into it.
pub fn scan_conflicts(schedule: &SellerSchedule) -> Vec<StoredConflict> {
    let mut found = Vec::new();
    let mut reach: Option<&Appointment> = None;
    for appt in schedule
        .appointments
        .iter()
        .filter(|a| a.status.is_blocking())
    {
        if let Some(prev) = reach {
            if appt.span.start <= prev.span.end {
                found.push(StoredConflict {
                    seller_id: schedule.seller_id,
                    first: prev.id,
                    second: appt.id,
                });
            }
            if appt.span.end > prev.span.end {
                reach = Some(appt);
            }
        } else {
            reach = Some(appt);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Ms = 60_000;
    const HOUR: Ms = 60 * MIN;
    /// 2026-01-05T00:00:00Z
    const DAY: Ms = 1_767_571_200_000;

    fn at(h: i64, m: i64) -> Ms {
        DAY + h * HOUR + m * MIN
    }

    fn schedule_with(seller: Ulid, appts: Vec<Appointment>) -> SellerSchedule {
        let mut s = SellerSchedule::new(seller);
        for a in appts {
            s.insert(a);
        }
        s
    }

    fn candidate(seller: Ulid, start: Ms, end: Ms) -> Appointment {
        Appointment::scheduled(Ulid::new(), seller, Span::new(start, end))
    }

    #[test]
    fn ten_to_eleven_scenario() {
        let r = Ulid::new();
        let s = Ulid::new();
        let existing = candidate(r, at(10, 0), at(11, 0));
        let existing_id = existing.id;
        let store = schedule_with(r, vec![existing]);

        let inside = check_no_conflict(&candidate(r, at(10, 30), at(10, 45)), &store);
        assert!(matches!(
            inside,
            Err(EngineError::Conflict { existing, .. }) if existing == existing_id
        ));

        let touching = check_no_conflict(&candidate(r, at(11, 0), at(12, 0)), &store);
        assert!(matches!(touching, Err(EngineError::Conflict { .. })));

        check_no_conflict(&candidate(r, at(11, 1), at(12, 0)), &store).unwrap();
        check_no_conflict(&candidate(s, at(10, 30), at(10, 45)), &store).unwrap();
    }

    #[test]
    fn touching_at_start_conflicts() {
        let r = Ulid::new();
        let store = schedule_with(r, vec![candidate(r, at(10, 0), at(11, 0))]);
        let result = check_no_conflict(&candidate(r, at(9, 0), at(10, 0)), &store);
        assert!(matches!(result, Err(EngineError::Conflict { .. })));
        check_no_conflict(&candidate(r, at(9, 0), at(9, 59)), &store).unwrap();
    }

    #[test]
    fn enclosing_candidate_conflicts() {
        let r = Ulid::new();
        let store = schedule_with(r, vec![candidate(r, at(10, 0), at(11, 0))]);
        let result = check_no_conflict(&candidate(r, at(8, 0), at(13, 0)), &store);
        assert!(matches!(result, Err(EngineError::Conflict { .. })));
    }

    #[test]
    fn finished_and_canceled_do_not_block() {
        let r = Ulid::new();
        let store = schedule_with(
            r,
            vec![
                candidate(r, at(10, 0), at(11, 0)).with_status(AppointmentStatus::Finished),
                candidate(r, at(10, 0), at(11, 0)).with_status(AppointmentStatus::Canceled),
            ],
        );
        check_no_conflict(&candidate(r, at(10, 15), at(10, 45)), &store).unwrap();
    }

    #[test]
    fn own_record_is_excluded() {
        let r = Ulid::new();
        let stored = candidate(r, at(10, 0), at(11, 0));
        let store = schedule_with(r, vec![stored.clone()]);

        check_no_conflict(&stored, &store).unwrap();

        let mut moved = stored.clone();
        moved.span = Span::new(at(10, 30), at(11, 30));
        check_no_conflict(&moved, &store).unwrap();
    }

    #[test]
    fn own_record_excluded_but_others_still_block() {
        let r = Ulid::new();
        let stored = candidate(r, at(10, 0), at(11, 0));
        let other = candidate(r, at(12, 0), at(13, 0));
        let other_id = other.id;
        let store = schedule_with(r, vec![stored.clone(), other]);

        let mut moved = stored;
        moved.span = Span::new(at(10, 30), at(12, 0));
        let result = check_no_conflict(&moved, &store);
        assert!(matches!(
            result,
            Err(EngineError::Conflict { existing, .. }) if existing == other_id
        ));
    }

    #[test]
    fn reversed_interval_rejected_before_lookup() {
        let r = Ulid::new();
        let store = SellerSchedule::new(r);
        let result = check_no_conflict(&candidate(r, at(11, 0), at(10, 0)), &store);
        assert!(matches!(result, Err(EngineError::InvalidInterval(_))));
    }

    #[test]
    fn zero_length_candidate_is_an_instant() {
        let r = Ulid::new();
        let store = schedule_with(r, vec![candidate(r, at(10, 0), at(11, 0))]);
        let result = check_no_conflict(&candidate(r, at(11, 0), at(11, 0)), &store);
        assert!(matches!(result, Err(EngineError::Conflict { .. })));
        check_no_conflict(&candidate(r, at(11, 1), at(11, 1)), &store).unwrap();
    }

    #[test]
    fn canceled_candidate_skips_check() {
        let r = Ulid::new();
        let store = schedule_with(r, vec![candidate(r, at(10, 0), at(11, 0))]);
        let c = candidate(r, at(10, 0), at(11, 0)).with_status(AppointmentStatus::Canceled);
        check_no_conflict(&c, &store).unwrap();
    }

    #[test]
    fn lookup_filters_by_seller_and_status() {
        let r = Ulid::new();
        let store = schedule_with(
            r,
            vec![
                candidate(r, at(10, 0), at(11, 0)),
                candidate(r, at(10, 0), at(11, 0)).with_status(AppointmentStatus::Finished),
            ],
        );
        assert_eq!(
            store.find(r, AppointmentStatus::Scheduled, at(11, 0), at(10, 0)).len(),
            1
        );
        assert_eq!(
            store.find(r, AppointmentStatus::Finished, at(11, 0), at(10, 0)).len(),
            1
        );
        assert!(store
            .find(Ulid::new(), AppointmentStatus::Scheduled, at(11, 0), at(10, 0))
            .is_empty());
    }

    #[test]
    fn batch_disjoint_checks_same_seller_only() {
        let r = Ulid::new();
        let s = Ulid::new();
        let ok = vec![
            candidate(r, at(10, 0), at(11, 0)),
            candidate(s, at(10, 0), at(11, 0)),
            candidate(r, at(11, 1), at(12, 0)),
        ];
        check_batch_disjoint(&ok).unwrap();

        let bad = vec![
            candidate(r, at(10, 0), at(11, 0)),
            candidate(r, at(11, 0), at(12, 0)),
        ];
        assert!(matches!(
            check_batch_disjoint(&bad),
            Err(EngineError::Conflict { .. })
        ));
    }

    #[test]
    fn scan_finds_stored_overlaps() {
        let r = Ulid::new();
        let long = candidate(r, at(9, 0), at(17, 0));
        let a = candidate(r, at(10, 0), at(11, 0));
        let b = candidate(r, at(12, 0), at(13, 0));
        let after = candidate(r, at(18, 0), at(19, 0));
        let ids = (long.id, a.id, b.id);
        let s = schedule_with(r, vec![long, a, b, after]);

        let found = scan_conflicts(&s);
        assert_eq!(found.len(), 2);
        assert_eq!((found[0].first, found[0].second), (ids.0, ids.1));
        assert_eq!((found[1].first, found[1].second), (ids.0, ids.2));
    }

    #[test]
    fn scan_ignores_inactive_and_clean_schedules() {
        let r = Ulid::new();
        let s = schedule_with(
            r,
            vec![
                candidate(r, at(10, 0), at(11, 0)),
                candidate(r, at(10, 30), at(11, 30)).with_status(AppointmentStatus::Canceled),
                candidate(r, at(11, 1), at(12, 0)),
            ],
        );
        assert!(scan_conflicts(&s).is_empty());
    }
}

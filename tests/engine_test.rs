// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine public API integration tests.

use borrow_ledger_rs::{
    BorrowRecord, BorrowStatus, CopyId, CopyRegistry, CopyState, Engine, LedgerConfig,
    LedgerError, LedgerEvent, LedgerResult, LedgerStore, MemoryLedger, NewRecord, RecordFilter,
    RecordId, TitleId, UserId,
};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn engine_with_copies(copies: &[u64]) -> Engine {
    let engine = Engine::new();
    for &copy in copies {
        engine.register_copy(CopyId(copy), TitleId(100)).unwrap();
    }
    engine
}

/// Ledger that fails a set number of appends/updates with `StoreUnavailable`.
#[derive(Default)]
struct FlakyLedger {
    inner: MemoryLedger,
    append_failures: AtomicU32,
    update_failures: AtomicU32,
}

impl FlakyLedger {
    fn failing_appends(n: u32) -> Self {
        let ledger = Self::default();
        ledger.append_failures.store(n, Ordering::SeqCst);
        ledger
    }

    fn failing_updates(n: u32) -> Self {
        let ledger = Self::default();
        ledger.update_failures.store(n, Ordering::SeqCst);
        ledger
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl LedgerStore for FlakyLedger {
    fn append(&self, record: NewRecord) -> LedgerResult<BorrowRecord> {
        if Self::take_failure(&self.append_failures) {
            return Err(LedgerError::StoreUnavailable);
        }
        self.inner.append(record)
    }

    fn update(&self, record_id: RecordId, returned_at: NaiveDate) -> LedgerResult<BorrowRecord> {
        if Self::take_failure(&self.update_failures) {
            return Err(LedgerError::StoreUnavailable);
        }
        self.inner.update(record_id, returned_at)
    }

    fn reopen(&self, record_id: RecordId) -> LedgerResult<BorrowRecord> {
        self.inner.reopen(record_id)
    }

    fn get(&self, record_id: RecordId) -> LedgerResult<BorrowRecord> {
        self.inner.get(record_id)
    }

    fn restore(&self, record: BorrowRecord) -> LedgerResult<BorrowRecord> {
        self.inner.restore(record)
    }

    fn scan(&self, filter: &RecordFilter) -> Vec<RecordId> {
        self.inner.scan(filter)
    }
}

fn flaky_engine(ledger: FlakyLedger, max_attempts: u32) -> (Engine<FlakyLedger>, Arc<FlakyLedger>) {
    let mut config = LedgerConfig::default();
    config.retry.max_attempts = max_attempts;
    config.retry.base_delay_ms = 1;
    let ledger = Arc::new(ledger);
    let engine = Engine::with_stores(Arc::new(CopyRegistry::new()), Arc::clone(&ledger), &config);
    engine.register_copy(CopyId(1), TitleId(1)).unwrap();
    (engine, ledger)
}

#[test]
fn borrow_overdue_return_scenario() {
    let engine = engine_with_copies(&[1]);

    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    assert_eq!(record.due_at, date(2025, 1, 15));
    assert_eq!(record.status, BorrowStatus::Borrowed);
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);

    let overdue: Vec<BorrowRecord> = engine
        .loans()
        .overdue_loans(date(2025, 1, 20))
        .into_iter()
        .collect();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, record.id);
    assert_eq!(overdue[0].status, BorrowStatus::Overdue);

    let returned = engine.return_copy(record.id, date(2025, 1, 20)).unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert_eq!(returned.returned_at, Some(date(2025, 1, 20)));
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);

    let overdue = engine.loans().overdue_loans(date(2025, 1, 20));
    assert_eq!(overdue.iter().count(), 0);
}

#[test]
fn borrow_then_return_restores_copy() {
    let engine = engine_with_copies(&[1]);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    engine.return_copy(record.id, date(2025, 1, 1)).unwrap();

    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);
    assert_eq!(
        engine.record(record.id).unwrap().status,
        BorrowStatus::Returned
    );
}

#[test]
fn borrow_default_uses_configured_period() {
    let config = LedgerConfig {
        loan_period_days: 21,
        ..LedgerConfig::default()
    };
    let engine = Engine::from_config(&config);
    engine.register_copy(CopyId(1), TitleId(1)).unwrap();

    let record = engine
        .borrow_default(UserId(1), CopyId(1), date(2025, 1, 1))
        .unwrap();
    assert_eq!(record.due_at, date(2025, 1, 22));
}

#[test]
fn borrow_unknown_copy_returns_error() {
    let engine = Engine::new();
    let result = engine.borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14);
    assert_eq!(result, Err(LedgerError::NotFound));
    assert!(engine.ledger().is_empty());
}

#[test]
fn borrow_borrowed_copy_returns_error() {
    let engine = engine_with_copies(&[1]);
    engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();

    let result = engine.borrow(UserId(2), CopyId(1), date(2025, 1, 2), 14);
    assert_eq!(result, Err(LedgerError::AlreadyBorrowed));
    assert_eq!(engine.ledger().len(), 1);
}

#[test]
fn borrow_lost_copy_returns_error() {
    let engine = engine_with_copies(&[1]);
    engine.mark_lost(CopyId(1)).unwrap();

    let result = engine.borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14);
    assert_eq!(result, Err(LedgerError::CopyLost));

    engine.mark_found(CopyId(1)).unwrap();
    engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
}

#[test]
fn borrowed_copy_cannot_be_marked_lost() {
    let engine = engine_with_copies(&[1]);
    engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    assert_eq!(engine.mark_lost(CopyId(1)), Err(LedgerError::AlreadyBorrowed));
}

#[test]
fn return_twice_returns_error() {
    let engine = engine_with_copies(&[1]);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    engine.return_copy(record.id, date(2025, 1, 5)).unwrap();

    let result = engine.return_copy(record.id, date(2025, 1, 6));
    assert_eq!(result, Err(LedgerError::AlreadyReturned));
    assert_eq!(
        engine.record(record.id).unwrap().returned_at,
        Some(date(2025, 1, 5))
    );
}

#[test]
fn return_unknown_record_returns_error() {
    let engine = engine_with_copies(&[1]);
    let result = engine.return_copy(RecordId(99), date(2025, 1, 5));
    assert_eq!(result, Err(LedgerError::NotFound));
}

#[test]
fn return_before_borrow_date_leaves_record_unmodified() {
    let engine = engine_with_copies(&[1]);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 10), 14)
        .unwrap();

    let result = engine.return_copy(record.id, date(2025, 1, 9));
    assert_eq!(result, Err(LedgerError::InvalidDate));
    assert_eq!(engine.record(record.id).unwrap(), record);
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
}

#[test]
fn late_return_is_accepted_and_journaled() {
    let engine = engine_with_copies(&[1]);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    let returned = engine.return_copy(record.id, date(2025, 2, 1)).unwrap();

    assert_eq!(returned.status, BorrowStatus::Returned);
    assert!(returned.returned_late());
    let events = engine.drain_events();
    assert_eq!(
        events.last(),
        Some(&LedgerEvent::Returned {
            record_id: record.id,
            copy_id: CopyId(1),
            returned_at: date(2025, 2, 1),
            late: true,
        })
    );
}

#[test]
fn transient_append_failure_is_retried() {
    let (engine, _) = flaky_engine(FlakyLedger::failing_appends(1), 3);

    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);

    let events = engine.drain_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        LedgerEvent::Compensated {
            cause: LedgerError::StoreUnavailable,
            record_id: None,
            ..
        }
    ));
    assert!(matches!(events[1], LedgerEvent::Borrowed { record_id, .. } if record_id == record.id));
}

#[test]
fn persistent_append_failure_rolls_back_copy() {
    let (engine, ledger) = flaky_engine(FlakyLedger::failing_appends(10), 2);

    let result = engine.borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14);
    assert_eq!(result, Err(LedgerError::StoreUnavailable));
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);
    assert!(ledger.inner.is_empty());

    // One compensation per attempt
    let events = engine.drain_events();
    assert_eq!(events.len(), 2);
    assert!(
        events
            .iter()
            .all(|event| matches!(event, LedgerEvent::Compensated { .. }))
    );
}

#[test]
fn ledger_duplicate_open_loan_rolls_back_copy() {
    let registry = Arc::new(CopyRegistry::new());
    let ledger = Arc::new(MemoryLedger::new());
    let engine = Engine::with_stores(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        &LedgerConfig::default(),
    );
    engine.register_copy(CopyId(1), TitleId(1)).unwrap();

    // Out-of-band open record the registry does not know about
    ledger
        .append(NewRecord {
            user_id: UserId(9),
            copy_id: CopyId(1),
            borrowed_at: date(2025, 1, 1),
            due_at: date(2025, 1, 15),
        })
        .unwrap();

    let result = engine.borrow(UserId(1), CopyId(1), date(2025, 1, 2), 14);
    assert_eq!(result, Err(LedgerError::DuplicateOpenLoan));
    assert_eq!(registry.lookup(CopyId(1)).unwrap().state, CopyState::Available);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn registry_failure_on_return_reopens_record() {
    let registry = Arc::new(CopyRegistry::new());
    let engine = Engine::with_stores(
        Arc::clone(&registry),
        Arc::new(MemoryLedger::new()),
        &LedgerConfig::default(),
    );
    engine.register_copy(CopyId(1), TitleId(1)).unwrap();
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    engine.drain_events();

    // Registry released out of band
    registry.mark_returned(CopyId(1)).unwrap();

    let result = engine.return_copy(record.id, date(2025, 1, 5));
    assert_eq!(result, Err(LedgerError::NotBorrowed));

    let stored = engine.record(record.id).unwrap();
    assert_eq!(stored.returned_at, None);
    assert_eq!(stored.status, BorrowStatus::Borrowed);
    assert_eq!(engine.ledger().open_record_for(CopyId(1)), Some(record.id));
    assert_eq!(
        engine.drain_events(),
        vec![LedgerEvent::Compensated {
            copy_id: CopyId(1),
            record_id: Some(record.id),
            cause: LedgerError::NotBorrowed,
        }]
    );
}

#[test]
fn transient_update_failure_is_retried() {
    let (engine, _) = flaky_engine(FlakyLedger::failing_updates(2), 3);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();

    let returned = engine.return_copy(record.id, date(2025, 1, 3)).unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);
}

#[test]
fn persistent_update_failure_leaves_loan_open() {
    let (engine, _) = flaky_engine(FlakyLedger::failing_updates(10), 2);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();

    let result = engine.return_copy(record.id, date(2025, 1, 3));
    assert_eq!(result, Err(LedgerError::StoreUnavailable));
    assert!(engine.record(record.id).unwrap().is_open());
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
}

#[test]
fn copy_can_be_borrowed_again_after_return() {
    let engine = engine_with_copies(&[1]);
    let first = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    engine.return_copy(first.id, date(2025, 1, 5)).unwrap();
    let second = engine
        .borrow(UserId(2), CopyId(1), date(2025, 1, 6), 14)
        .unwrap();

    let history: Vec<RecordId> = engine
        .loans()
        .history_for_copy(CopyId(1))
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(history, vec![first.id, second.id]);
}

#[test]
fn history_for_user_spans_copies_in_borrow_order() {
    let engine = engine_with_copies(&[1, 2, 3]);
    let later = engine
        .borrow(UserId(1), CopyId(1), date(2025, 2, 1), 14)
        .unwrap();
    let earlier = engine
        .borrow(UserId(1), CopyId(2), date(2025, 1, 1), 14)
        .unwrap();
    engine
        .borrow(UserId(2), CopyId(3), date(2025, 1, 1), 14)
        .unwrap();
    engine.return_copy(earlier.id, date(2025, 1, 10)).unwrap();

    let history: Vec<BorrowRecord> = engine
        .loans_as_of(date(2025, 2, 3))
        .history_for_user(UserId(1))
        .into_iter()
        .collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, earlier.id);
    assert_eq!(history[0].status, BorrowStatus::Returned);
    assert_eq!(history[1].id, later.id);
    assert_eq!(history[1].status, BorrowStatus::Borrowed);
}

#[test]
fn active_loans_include_overdue_and_exclude_returned() {
    let engine = engine_with_copies(&[1, 2, 3]);
    engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    engine
        .borrow(UserId(1), CopyId(2), date(2025, 1, 18), 14)
        .unwrap();
    let returned = engine
        .borrow(UserId(2), CopyId(3), date(2025, 1, 1), 14)
        .unwrap();
    engine.return_copy(returned.id, date(2025, 1, 2)).unwrap();

    let loans = engine.loans_as_of(date(2025, 1, 20));
    let statuses: Vec<(CopyId, BorrowStatus)> = loans
        .active_loans()
        .into_iter()
        .map(|record| (record.copy_id, record.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (CopyId(1), BorrowStatus::Overdue),
            (CopyId(2), BorrowStatus::Borrowed),
        ]
    );
}

#[test]
fn views_are_restartable_and_see_new_records() {
    let engine = engine_with_copies(&[1, 2]);
    let loans = engine.loans_as_of(date(2025, 1, 1));
    let active = loans.active_loans();
    assert_eq!(active.iter().count(), 0);

    engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();
    assert_eq!(active.iter().count(), 1);
    assert_eq!(active.iter().count(), 1);
}

#[test]
fn compute_status_is_pure() {
    let engine = engine_with_copies(&[1]);
    let record = engine
        .borrow(UserId(1), CopyId(1), date(2025, 1, 1), 14)
        .unwrap();

    let first = engine.compute_status(&record, date(2025, 1, 20));
    let second = engine.compute_status(&record, date(2025, 1, 20));
    assert_eq!(first, BorrowStatus::Overdue);
    assert_eq!(first, second);
    assert_eq!(engine.record(record.id).unwrap().status, BorrowStatus::Borrowed);
}

fn exported(id: u64, copy: u64, returned_at: Option<NaiveDate>) -> BorrowRecord {
    let now = Utc::now();
    BorrowRecord {
        id: RecordId(id),
        user_id: UserId(9),
        copy_id: CopyId(copy),
        borrowed_at: date(2025, 1, 1),
        due_at: date(2025, 1, 15),
        returned_at,
        status: BorrowStatus::Borrowed,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn restored_open_record_marks_copy_borrowed() {
    let engine = engine_with_copies(&[1, 2]);
    engine
        .restore_record(exported(7, 1, Some(date(2025, 1, 5))))
        .unwrap();
    engine.restore_record(exported(8, 1, None)).unwrap();

    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
    assert_eq!(
        engine.borrow(UserId(1), CopyId(1), date(2025, 2, 1), 14),
        Err(LedgerError::AlreadyBorrowed)
    );

    // New loans continue after the highest restored ID
    let next = engine
        .borrow(UserId(1), CopyId(2), date(2025, 2, 1), 14)
        .unwrap();
    assert_eq!(next.id, RecordId(9));

    let returned = engine.return_copy(RecordId(8), date(2025, 1, 20)).unwrap();
    assert!(returned.returned_late());
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);

    let events = engine.drain_events();
    assert!(events.contains(&LedgerEvent::Restored {
        record_id: RecordId(8),
        copy_id: CopyId(1),
        open: true,
    }));
}

#[test]
fn restore_of_unknown_copy_is_not_found() {
    let engine = engine_with_copies(&[]);
    assert_eq!(
        engine.restore_record(exported(1, 1, None)),
        Err(LedgerError::NotFound)
    );
    assert!(engine.ledger().is_empty());
}

#[test]
fn restore_of_open_record_on_lost_copy_is_rejected() {
    let engine = engine_with_copies(&[1]);
    engine.mark_lost(CopyId(1)).unwrap();

    assert_eq!(
        engine.restore_record(exported(1, 1, None)),
        Err(LedgerError::CopyLost)
    );
    assert!(engine.ledger().is_empty());
    assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Lost);
}

#[test]
fn refused_restore_releases_copy() {
    let engine = engine_with_copies(&[1, 2]);
    engine
        .restore_record(exported(1, 1, Some(date(2025, 1, 3))))
        .unwrap();

    assert_eq!(
        engine.restore_record(exported(1, 2, None)),
        Err(LedgerError::DuplicateRecord)
    );
    assert_eq!(engine.copy(CopyId(2)).unwrap().state, CopyState::Available);
    assert!(matches!(
        engine.drain_events().last(),
        Some(LedgerEvent::Compensated {
            cause: LedgerError::DuplicateRecord,
            ..
        })
    ));
}

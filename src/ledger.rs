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

//! Ledger store.
//!
//! Borrow records are appended when a loan starts and updated once when it
//! ends. They are never deleted.

use crate::base::{CopyId, RecordId, UserId};
use crate::error::{LedgerError, LedgerResult};
use crate::record::{BorrowRecord, BorrowStatus, NewRecord, compute_status};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

/// Durable store of borrow records.
///
/// Implementations must keep at most one open record per copy.
pub trait LedgerStore: Send + Sync {
    /// Persists a new open record under a freshly assigned ID.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateOpenLoan`] - Copy already has an open record.
    /// - [`LedgerError::InvalidDate`] - Due date precedes the borrow date.
    fn append(&self, record: NewRecord) -> LedgerResult<BorrowRecord>;

    /// Closes a record, setting its return date and `Returned` status.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown record.
    /// - [`LedgerError::AlreadyReturned`] - Record is already closed.
    /// - [`LedgerError::InvalidDate`] - Return date precedes the borrow date.
    fn update(&self, record_id: RecordId, returned_at: NaiveDate) -> LedgerResult<BorrowRecord>;

    /// Undoes [`update`](Self::update). Only used to compensate a failed return.
    fn reopen(&self, record_id: RecordId) -> LedgerResult<BorrowRecord>;

    fn get(&self, record_id: RecordId) -> LedgerResult<BorrowRecord>;

    /// Inserts a record exported earlier, keeping its ID and timestamps.
    ///
    /// The stored status follows `returned_at`. Later appends get IDs above
    /// every restored one.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateRecord`] - ID is already in use.
    /// - [`LedgerError::DuplicateOpenLoan`] - Record is open and the copy already has an open record.
    /// - [`LedgerError::InvalidDate`] - Due or return date precedes the borrow date.
    fn restore(&self, record: BorrowRecord) -> LedgerResult<BorrowRecord>;

    /// IDs of records matching `filter`, ordered by borrow date then ID.
    ///
    /// The status part of the filter is not applied here. The whole ID list
    /// is collected up front, so a query is lazy per iteration: nothing is
    /// read until the first `next`, and records are then fetched one by one
    /// from that snapshot of IDs.
    fn scan(&self, filter: &RecordFilter) -> Vec<RecordId>;

    /// Lazily iterates records matching `filter`.
    fn query(&self, filter: RecordFilter) -> RecordQuery<'_, Self>
    where
        Self: Sized,
    {
        RecordQuery::new(self, filter)
    }
}

/// Record selection criteria. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub user_id: Option<UserId>,
    pub copy_id: Option<CopyId>,
    pub status: Option<BorrowStatus>,
    /// Inclusive lower bound on the borrow date.
    pub borrowed_from: Option<NaiveDate>,
    /// Inclusive upper bound on the borrow date.
    pub borrowed_to: Option<NaiveDate>,
    pub open_only: bool,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn copy(mut self, copy_id: CopyId) -> Self {
        self.copy_id = Some(copy_id);
        self
    }

    pub fn status(mut self, status: BorrowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn borrowed_between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.borrowed_from = Some(from);
        self.borrowed_to = Some(to);
        self
    }

    pub fn open(mut self) -> Self {
        self.open_only = true;
        self
    }

    /// Checks everything except status, which depends on the query date.
    pub fn matches_stored(&self, record: &BorrowRecord) -> bool {
        self.user_id.is_none_or(|user| record.user_id == user)
            && self.copy_id.is_none_or(|copy| record.copy_id == copy)
            && self.borrowed_from.is_none_or(|from| record.borrowed_at >= from)
            && self.borrowed_to.is_none_or(|to| record.borrowed_at <= to)
            && (!self.open_only || record.is_open())
    }
}

/// A restartable query over a ledger store.
///
/// Nothing is read until iteration starts, and every call to
/// [`iter`](Self::iter) scans the store again.
#[derive(Debug)]
pub struct RecordQuery<'a, L: ?Sized> {
    store: &'a L,
    filter: RecordFilter,
    as_of: Option<NaiveDate>,
}

impl<L: ?Sized> Clone for RecordQuery<'_, L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store,
            filter: self.filter.clone(),
            as_of: self.as_of,
        }
    }
}

impl<'a, L: LedgerStore + ?Sized> RecordQuery<'a, L> {
    pub fn new(store: &'a L, filter: RecordFilter) -> Self {
        Self {
            store,
            filter,
            as_of: None,
        }
    }

    /// Derives the status of open records as of `date`.
    ///
    /// Without a date, yielded records carry their stored status.
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn filter(&self) -> &RecordFilter {
        &self.filter
    }

    pub fn iter(&self) -> RecordIter<'a, L> {
        RecordIter {
            query: self.clone(),
            ids: None,
        }
    }
}

impl<'a, L: LedgerStore + ?Sized> IntoIterator for &RecordQuery<'a, L> {
    type Item = BorrowRecord;
    type IntoIter = RecordIter<'a, L>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, L: LedgerStore + ?Sized> IntoIterator for RecordQuery<'a, L> {
    type Item = BorrowRecord;
    type IntoIter = RecordIter<'a, L>;

    fn into_iter(self) -> Self::IntoIter {
        RecordIter {
            query: self,
            ids: None,
        }
    }
}

/// Iterator produced by [`RecordQuery`].
pub struct RecordIter<'a, L: ?Sized> {
    query: RecordQuery<'a, L>,
    ids: Option<std::vec::IntoIter<RecordId>>,
}

impl<L: LedgerStore + ?Sized> Iterator for RecordIter<'_, L> {
    type Item = BorrowRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.query.store;
        let ids = self
            .ids
            .get_or_insert_with(|| store.scan(&self.query.filter).into_iter());

        for id in ids.by_ref() {
            // Records are never deleted, but a concurrent writer may have
            // closed one since the scan.
            let Ok(mut record) = store.get(id) else {
                continue;
            };
            if !self.query.filter.matches_stored(&record) {
                continue;
            }
            if let Some(as_of) = self.query.as_of {
                record.status = compute_status(&record, as_of);
            }
            if self
                .query
                .filter
                .status
                .is_some_and(|status| status != record.status)
            {
                continue;
            }
            return Some(record);
        }
        None
    }
}

/// In-memory [`LedgerStore`].
#[derive(Debug)]
pub struct MemoryLedger {
    /// Records indexed by record ID.
    records: DashMap<RecordId, BorrowRecord>,
    /// Open record per copy, for the one-open-loan check.
    open_by_copy: DashMap<CopyId, RecordId>,
    next_id: AtomicU64,
}

// Lock order is `open_by_copy` before `records`. `update` releases its
// `records` guard before touching `open_by_copy`.
impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            open_by_copy: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_new(&self, record: BorrowRecord) -> LedgerResult<()> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateRecord),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    /// ID of the open record for `copy_id`, if any.
    pub fn open_record_for(&self, copy_id: CopyId) -> Option<RecordId> {
        self.open_by_copy.get(&copy_id).map(|id| *id)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&self, record: NewRecord) -> LedgerResult<BorrowRecord> {
        if record.due_at < record.borrowed_at {
            return Err(LedgerError::InvalidDate);
        }

        match self.open_by_copy.entry(record.copy_id) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateOpenLoan),
            Entry::Vacant(entry) => {
                let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst));
                let now = Utc::now();
                let stored = BorrowRecord {
                    id,
                    user_id: record.user_id,
                    copy_id: record.copy_id,
                    borrowed_at: record.borrowed_at,
                    due_at: record.due_at,
                    returned_at: None,
                    status: BorrowStatus::Borrowed,
                    created_at: now,
                    updated_at: now,
                };
                self.records.insert(id, stored.clone());
                entry.insert(id);
                Ok(stored)
            }
        }
    }

    fn update(&self, record_id: RecordId, returned_at: NaiveDate) -> LedgerResult<BorrowRecord> {
        let updated = {
            let mut record = self
                .records
                .get_mut(&record_id)
                .ok_or(LedgerError::NotFound)?;
            if record.returned_at.is_some() {
                return Err(LedgerError::AlreadyReturned);
            }
            if returned_at < record.borrowed_at {
                return Err(LedgerError::InvalidDate);
            }
            record.returned_at = Some(returned_at);
            record.status = BorrowStatus::Returned;
            record.updated_at = Utc::now();
            record.clone()
        };

        self.open_by_copy
            .remove_if(&updated.copy_id, |_, open| *open == record_id);
        Ok(updated)
    }

    fn reopen(&self, record_id: RecordId) -> LedgerResult<BorrowRecord> {
        let copy_id = self
            .records
            .get(&record_id)
            .map(|record| record.copy_id)
            .ok_or(LedgerError::NotFound)?;

        match self.open_by_copy.entry(copy_id) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateOpenLoan),
            Entry::Vacant(entry) => {
                let mut record = self
                    .records
                    .get_mut(&record_id)
                    .ok_or(LedgerError::NotFound)?;
                if record.returned_at.is_none() {
                    return Err(LedgerError::NotBorrowed);
                }
                record.returned_at = None;
                record.status = BorrowStatus::Borrowed;
                record.updated_at = Utc::now();
                entry.insert(record_id);
                Ok(record.clone())
            }
        }
    }

    fn get(&self, record_id: RecordId) -> LedgerResult<BorrowRecord> {
        self.records
            .get(&record_id)
            .map(|record| record.clone())
            .ok_or(LedgerError::NotFound)
    }

    fn restore(&self, mut record: BorrowRecord) -> LedgerResult<BorrowRecord> {
        if record.due_at < record.borrowed_at
            || record
                .returned_at
                .is_some_and(|returned| returned < record.borrowed_at)
        {
            return Err(LedgerError::InvalidDate);
        }
        record.status = if record.is_open() {
            BorrowStatus::Borrowed
        } else {
            BorrowStatus::Returned
        };

        let record_id = record.id;
        if record.is_open() {
            match self.open_by_copy.entry(record.copy_id) {
                Entry::Occupied(_) => return Err(LedgerError::DuplicateOpenLoan),
                Entry::Vacant(open) => {
                    self.insert_new(record.clone())?;
                    open.insert(record_id);
                }
            }
        } else {
            self.insert_new(record.clone())?;
        }

        self.next_id
            .fetch_max(record_id.0.saturating_add(1), Ordering::SeqCst);
        Ok(record)
    }

    fn scan(&self, filter: &RecordFilter) -> Vec<RecordId> {
        let mut keys: Vec<(NaiveDate, RecordId)> = self
            .records
            .iter()
            .filter(|record| filter.matches_stored(record))
            .map(|record| (record.borrowed_at, record.id))
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, id)| id).collect()
    }
}

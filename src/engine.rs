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

use crate::base::{CopyId, RecordId, TitleId, UserId};
use crate::config::LedgerConfig;
use crate::copy::{CopyInfo, CopyRegistry};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{Journal, LedgerEvent};
use crate::ledger::{LedgerStore, MemoryLedger};
use crate::query::LoanQueries;
use crate::record::{BorrowRecord, BorrowStatus, NewRecord, compute_status};
use crate::retry::RetryPolicy;
use chrono::{Days, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Borrowing policy engine.
///
/// The only writer to the copy registry and the ledger store. Every borrow,
/// return, loss and recovery runs under the copy's write lock, so the
/// registry transition and the ledger write commit or roll back together.
pub struct Engine<L = MemoryLedger> {
    registry: Arc<CopyRegistry>,
    ledger: Arc<L>,
    journal: Journal,
    /// One write lock per copy ID.
    copy_locks: DashMap<CopyId, Arc<Mutex<()>>>,
    loan_period_days: u32,
    store_timeout: Duration,
    retry: RetryPolicy,
}

impl Engine<MemoryLedger> {
    /// Creates an engine with empty in-memory stores and default configuration.
    pub fn new() -> Self {
        Self::from_config(&LedgerConfig::default())
    }

    /// Creates an engine with empty in-memory stores.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::with_stores(
            Arc::new(CopyRegistry::new()),
            Arc::new(MemoryLedger::new()),
            config,
        )
    }
}

impl Default for Engine<MemoryLedger> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LedgerStore> Engine<L> {
    pub fn with_stores(registry: Arc<CopyRegistry>, ledger: Arc<L>, config: &LedgerConfig) -> Self {
        Engine {
            registry,
            ledger,
            journal: Journal::new(),
            copy_locks: DashMap::new(),
            loan_period_days: config.loan_period_days,
            store_timeout: config.store_timeout(),
            retry: config.retry_policy(),
        }
    }

    pub fn registry(&self) -> &CopyRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn loan_period_days(&self) -> u32 {
        self.loan_period_days
    }

    /// Adds a copy to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateCopy`] if the copy is already registered.
    pub fn register_copy(&self, copy_id: CopyId, title_id: TitleId) -> LedgerResult<CopyInfo> {
        let info = self.registry.register(copy_id, title_id)?;
        self.copy_locks
            .entry(copy_id)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        debug!(%copy_id, %title_id, "copy registered");
        Ok(info)
    }

    pub fn copy(&self, copy_id: CopyId) -> LedgerResult<CopyInfo> {
        self.registry.lookup(copy_id)
    }

    /// Stored record. Open records carry `Borrowed` whatever their due date.
    pub fn record(&self, record_id: RecordId) -> LedgerResult<BorrowRecord> {
        self.ledger.get(record_id)
    }

    /// Record with its status derived as of `as_of`, as the views report it.
    pub fn record_as_of(
        &self,
        record_id: RecordId,
        as_of: NaiveDate,
    ) -> LedgerResult<BorrowRecord> {
        Ok(self.ledger.get(record_id)?.with_status_as_of(as_of))
    }

    /// Lends a copy to a user, due `loan_period_days` after `borrowed_at`.
    ///
    /// The copy is marked borrowed first and the record appended second. If
    /// the append fails the copy is put back before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown copy.
    /// - [`LedgerError::AlreadyBorrowed`] - Copy is already out.
    /// - [`LedgerError::CopyLost`] - Copy is marked lost.
    /// - [`LedgerError::InvalidDate`] - Due date is not representable.
    /// - [`LedgerError::DuplicateOpenLoan`] - Ledger already holds an open record.
    /// - [`LedgerError::StoreUnavailable`] - Store timed out on every attempt.
    pub fn borrow(
        &self,
        user_id: UserId,
        copy_id: CopyId,
        borrowed_at: NaiveDate,
        loan_period_days: u32,
    ) -> LedgerResult<BorrowRecord> {
        let due_at = borrowed_at
            .checked_add_days(Days::new(loan_period_days.into()))
            .ok_or(LedgerError::InvalidDate)?;
        let request = NewRecord {
            user_id,
            copy_id,
            borrowed_at,
            due_at,
        };
        self.with_retry("borrow", || self.try_borrow(request))
    }

    /// [`borrow`](Self::borrow) with the configured loan period.
    pub fn borrow_default(
        &self,
        user_id: UserId,
        copy_id: CopyId,
        borrowed_at: NaiveDate,
    ) -> LedgerResult<BorrowRecord> {
        self.borrow(user_id, copy_id, borrowed_at, self.loan_period_days)
    }

    /// Closes a loan and puts the copy back on the shelf.
    ///
    /// Late returns are accepted; lateness stays visible through
    /// [`BorrowRecord::returned_late`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown record.
    /// - [`LedgerError::AlreadyReturned`] - Record is already closed.
    /// - [`LedgerError::InvalidDate`] - `returned_at` precedes the borrow date.
    /// - [`LedgerError::NotBorrowed`] - Registry disagrees with the ledger; the
    ///   record is reopened.
    /// - [`LedgerError::StoreUnavailable`] - Store timed out on every attempt.
    pub fn return_copy(
        &self,
        record_id: RecordId,
        returned_at: NaiveDate,
    ) -> LedgerResult<BorrowRecord> {
        self.with_retry("return", || self.try_return(record_id, returned_at))
    }

    /// Loads an exported record back into the ledger.
    ///
    /// The copy must be registered. An open record marks it borrowed, and
    /// the copy is put back if the ledger then refuses the record.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown copy.
    /// - [`LedgerError::AlreadyBorrowed`] / [`LedgerError::CopyLost`] - Open
    ///   record for a copy that is not on the shelf.
    /// - [`LedgerError::DuplicateRecord`] - Record ID already in the ledger.
    /// - [`LedgerError::DuplicateOpenLoan`] - Ledger already holds an open record.
    /// - [`LedgerError::InvalidDate`] - Dates out of order.
    pub fn restore_record(&self, record: BorrowRecord) -> LedgerResult<BorrowRecord> {
        self.with_retry("restore", || self.try_restore(record.clone()))
    }

    /// Writes off a copy that is on the shelf.
    pub fn mark_lost(&self, copy_id: CopyId) -> LedgerResult<CopyInfo> {
        self.with_retry("mark_lost", || {
            let lock = self.copy_lock(copy_id)?;
            let _guard = self.acquire(&lock)?;
            self.registry.mark_lost(copy_id)?;
            self.journal.push(LedgerEvent::Lost { copy_id });
            info!(%copy_id, "copy marked lost");
            self.registry.lookup(copy_id)
        })
    }

    /// Puts a lost copy back on the shelf.
    pub fn mark_found(&self, copy_id: CopyId) -> LedgerResult<CopyInfo> {
        self.with_retry("mark_found", || {
            let lock = self.copy_lock(copy_id)?;
            let _guard = self.acquire(&lock)?;
            self.registry.mark_found(copy_id)?;
            self.journal.push(LedgerEvent::Found { copy_id });
            info!(%copy_id, "copy found");
            self.registry.lookup(copy_id)
        })
    }

    /// Derives a record's status as of `as_of`. Never mutates the record.
    pub fn compute_status(&self, record: &BorrowRecord, as_of: NaiveDate) -> BorrowStatus {
        compute_status(record, as_of)
    }

    /// Read-only views, with open record status derived as of today (UTC).
    pub fn loans(&self) -> LoanQueries<'_, L> {
        self.loans_as_of(Utc::now().date_naive())
    }

    /// Read-only views, with open record status derived as of `as_of`.
    pub fn loans_as_of(&self, as_of: NaiveDate) -> LoanQueries<'_, L> {
        LoanQueries::new(&*self.ledger, as_of)
    }

    /// Removes and returns journaled events, oldest first.
    pub fn drain_events(&self) -> Vec<LedgerEvent> {
        self.journal.drain()
    }

    fn try_borrow(&self, request: NewRecord) -> LedgerResult<BorrowRecord> {
        let copy_id = request.copy_id;
        let lock = self.copy_lock(copy_id)?;
        let _guard = self.acquire(&lock)?;

        self.registry.mark_borrowed(copy_id)?;

        match self.ledger.append(request) {
            Ok(record) => {
                self.journal.push(LedgerEvent::Borrowed {
                    record_id: record.id,
                    user_id: record.user_id,
                    copy_id,
                    borrowed_at: record.borrowed_at,
                    due_at: record.due_at,
                });
                info!(
                    record_id = %record.id,
                    user_id = %record.user_id,
                    %copy_id,
                    due_at = %record.due_at,
                    "copy borrowed"
                );
                Ok(record)
            }
            Err(cause) => {
                if let Err(rollback) = self.registry.mark_returned(copy_id) {
                    error!(%copy_id, %cause, %rollback, "failed to roll back borrowed copy");
                }
                self.journal.push(LedgerEvent::Compensated {
                    copy_id,
                    record_id: None,
                    cause: cause.clone(),
                });
                warn!(%copy_id, %cause, "ledger append failed, copy released");
                Err(cause)
            }
        }
    }

    fn try_restore(&self, record: BorrowRecord) -> LedgerResult<BorrowRecord> {
        let copy_id = record.copy_id;
        let open = record.is_open();
        let lock = self.copy_lock(copy_id)?;
        let _guard = self.acquire(&lock)?;

        if open {
            self.registry.mark_borrowed(copy_id)?;
        }

        match self.ledger.restore(record) {
            Ok(restored) => {
                self.journal.push(LedgerEvent::Restored {
                    record_id: restored.id,
                    copy_id,
                    open,
                });
                debug!(record_id = %restored.id, %copy_id, open, "record restored");
                Ok(restored)
            }
            Err(cause) if open => {
                if let Err(rollback) = self.registry.mark_returned(copy_id) {
                    error!(%copy_id, %cause, %rollback, "failed to roll back restored copy");
                }
                self.journal.push(LedgerEvent::Compensated {
                    copy_id,
                    record_id: None,
                    cause: cause.clone(),
                });
                warn!(%copy_id, %cause, "ledger restore failed, copy released");
                Err(cause)
            }
            Err(cause) => Err(cause),
        }
    }

    fn try_return(&self, record_id: RecordId, returned_at: NaiveDate) -> LedgerResult<BorrowRecord> {
        let copy_id = self.ledger.get(record_id)?.copy_id;
        let lock = self.copy_lock(copy_id)?;
        let _guard = self.acquire(&lock)?;

        // Re-read under the lock
        let record = self.ledger.get(record_id)?;
        if record.returned_at.is_some() {
            return Err(LedgerError::AlreadyReturned);
        }
        if returned_at < record.borrowed_at {
            return Err(LedgerError::InvalidDate);
        }

        let updated = self.ledger.update(record_id, returned_at)?;

        if let Err(cause) = self.registry.mark_returned(copy_id) {
            if let Err(rollback) = self.ledger.reopen(record_id) {
                error!(%record_id, %cause, %rollback, "failed to reopen record");
            }
            self.journal.push(LedgerEvent::Compensated {
                copy_id,
                record_id: Some(record_id),
                cause: cause.clone(),
            });
            warn!(%record_id, %copy_id, %cause, "registry release failed, record reopened");
            return Err(cause);
        }

        let late = updated.returned_late();
        self.journal.push(LedgerEvent::Returned {
            record_id,
            copy_id,
            returned_at,
            late,
        });
        info!(%record_id, %copy_id, %returned_at, late, "copy returned");
        Ok(updated)
    }

    /// Write lock of a registered copy.
    ///
    /// Unknown copies fail with [`LedgerError::NotFound`] and never get a lock.
    fn copy_lock(&self, copy_id: CopyId) -> LedgerResult<Arc<Mutex<()>>> {
        if let Some(lock) = self.copy_locks.get(&copy_id) {
            return Ok(Arc::clone(lock.value()));
        }
        // Copies registered straight on a shared registry get a lock on first use
        self.registry.lookup(copy_id)?;
        let lock = self
            .copy_locks
            .entry(copy_id)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Ok(Arc::clone(lock.value()))
    }

    fn acquire<'a>(&self, lock: &'a Mutex<()>) -> LedgerResult<parking_lot::MutexGuard<'a, ()>> {
        lock.try_lock_for(self.store_timeout)
            .ok_or(LedgerError::StoreUnavailable)
    }

    /// Runs `op`, retrying [`LedgerError::StoreUnavailable`] with backoff.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut op: impl FnMut() -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.next_delay(attempt);
                    warn!(operation, attempt, ?delay, "store unavailable, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

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

//! Read-only loan views.

use crate::base::{CopyId, UserId};
use crate::ledger::{LedgerStore, RecordFilter, RecordQuery};
use crate::record::BorrowStatus;
use chrono::NaiveDate;

/// Projections over the ledger with derived statuses.
///
/// Every view is a lazy [`RecordQuery`] ordered by borrow date then record ID.
/// Open records carry the status they have as of the facade's date.
pub struct LoanQueries<'a, L: ?Sized> {
    ledger: &'a L,
    as_of: NaiveDate,
}

impl<'a, L: LedgerStore + ?Sized> LoanQueries<'a, L> {
    pub fn new(ledger: &'a L, as_of: NaiveDate) -> Self {
        Self { ledger, as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// All open loans, overdue or not.
    pub fn active_loans(&self) -> RecordQuery<'a, L> {
        self.view(RecordFilter::new().open(), self.as_of)
    }

    /// Open loans whose due date is before `as_of`.
    pub fn overdue_loans(&self, as_of: NaiveDate) -> RecordQuery<'a, L> {
        self.view(RecordFilter::new().open().status(BorrowStatus::Overdue), as_of)
    }

    pub fn history_for_user(&self, user_id: UserId) -> RecordQuery<'a, L> {
        self.view(RecordFilter::new().user(user_id), self.as_of)
    }

    pub fn history_for_copy(&self, copy_id: CopyId) -> RecordQuery<'a, L> {
        self.view(RecordFilter::new().copy(copy_id), self.as_of)
    }

    /// Any other filter, with the same status derivation.
    pub fn matching(&self, filter: RecordFilter) -> RecordQuery<'a, L> {
        self.view(filter, self.as_of)
    }

    fn view(&self, filter: RecordFilter, as_of: NaiveDate) -> RecordQuery<'a, L> {
        RecordQuery::new(self.ledger, filter).as_of(as_of)
    }
}

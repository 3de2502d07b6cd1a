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

//! `borrow_records` table rows.
//!
//! Column names and value formats match the persisted schema. `status` is a
//! plain string here and an enum everywhere else.

use crate::base::{CopyId, RecordId, UserId};
use crate::error::{LedgerError, LedgerResult};
use crate::record::{BorrowRecord, BorrowStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecordRow {
    pub id: u64,
    pub user_id: u64,
    pub book_copy_id: u64,
    pub borrowed_at: NaiveDate,
    pub due_at: NaiveDate,
    pub returned_at: Option<NaiveDate>,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BorrowRecordRow {
    /// Parses a stored row back into a record.
    ///
    /// A derived `overdue` status is stored as `borrowed`, and the status
    /// must agree with the presence of `returned_at`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidDate`] when the dates are out of order
    /// or the status contradicts them.
    pub fn into_record(self) -> LedgerResult<BorrowRecord> {
        if self.due_at < self.borrowed_at
            || self.returned_at.is_some_and(|returned| returned < self.borrowed_at)
        {
            return Err(LedgerError::InvalidDate);
        }

        let status = match self.status.parse::<BorrowStatus>() {
            Ok(BorrowStatus::Returned) if self.returned_at.is_some() => BorrowStatus::Returned,
            Ok(BorrowStatus::Borrowed | BorrowStatus::Overdue) if self.returned_at.is_none() => {
                BorrowStatus::Borrowed
            }
            _ => return Err(LedgerError::InvalidDate),
        };

        Ok(BorrowRecord {
            id: RecordId(self.id),
            user_id: UserId(self.user_id),
            copy_id: CopyId(self.book_copy_id),
            borrowed_at: self.borrowed_at,
            due_at: self.due_at,
            returned_at: self.returned_at,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&BorrowRecord> for BorrowRecordRow {
    fn from(record: &BorrowRecord) -> Self {
        Self {
            id: record.id.0,
            user_id: record.user_id.0,
            book_copy_id: record.copy_id.0,
            borrowed_at: record.borrowed_at,
            due_at: record.due_at,
            returned_at: record.returned_at,
            status: record.status.as_str().to_string(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

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

use crate::base::{CopyId, RecordId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a borrow record.
///
/// Only `Borrowed` and `Returned` are ever persisted. `Overdue` is derived at
/// read time from the due date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    #[default]
    Borrowed,
    Returned,
    Overdue,
}

impl BorrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrowed => "borrowed",
            Self::Returned => "returned",
            Self::Overdue => "overdue",
        }
    }

    /// `true` for `Borrowed` and `Overdue`.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Returned)
    }
}

impl fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown borrow status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for BorrowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            // Column default
            "" | "borrowed" => Ok(Self::Borrowed),
            "returned" => Ok(Self::Returned),
            "overdue" => Ok(Self::Overdue),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Input to [`LedgerStore::append`](crate::LedgerStore::append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewRecord {
    pub user_id: UserId,
    pub copy_id: CopyId,
    pub borrowed_at: NaiveDate,
    pub due_at: NaiveDate,
}

/// One loan of one copy to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub copy_id: CopyId,
    pub borrowed_at: NaiveDate,
    pub due_at: NaiveDate,
    pub returned_at: Option<NaiveDate>,
    pub status: BorrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BorrowRecord {
    /// An open record has no return date.
    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }

    /// Returns a copy of the record with its status derived as of `as_of`.
    pub fn with_status_as_of(&self, as_of: NaiveDate) -> BorrowRecord {
        BorrowRecord {
            status: compute_status(self, as_of),
            ..self.clone()
        }
    }

    /// Whether the copy came back after its due date.
    pub fn returned_late(&self) -> bool {
        self.returned_at.is_some_and(|returned| returned > self.due_at)
    }
}

/// Derives the status of `record` as of `as_of`.
///
/// `Returned` whenever a return date is present, `Overdue` when open and
/// `as_of` is strictly after the due date, `Borrowed` otherwise.
pub fn compute_status(record: &BorrowRecord, as_of: NaiveDate) -> BorrowStatus {
    match record.returned_at {
        Some(_) => BorrowStatus::Returned,
        None if as_of > record.due_at => BorrowStatus::Overdue,
        None => BorrowStatus::Borrowed,
    }
}

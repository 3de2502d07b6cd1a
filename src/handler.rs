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

//! Request handling for an external transport.
//!
//! An HTTP layer (or any other) decodes a [`LedgerRequest`], hands it to
//! [`Engine::handle`] and encodes the [`LedgerResponse`] or [`ErrorResponse`].
//!
//! ```json
//! {"op": "borrow", "user_id": 1, "copy_id": 7, "borrowed_at": "2025-01-01"}
//! ```

use crate::base::{CopyId, RecordId, TitleId, UserId};
use crate::copy::CopyInfo;
use crate::engine::Engine;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerStore;
use crate::record::BorrowRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerRequest {
    RegisterCopy {
        copy_id: CopyId,
        title_id: TitleId,
    },
    Borrow {
        user_id: UserId,
        copy_id: CopyId,
        borrowed_at: NaiveDate,
        /// Falls back to the configured loan period.
        #[serde(default)]
        loan_period_days: Option<u32>,
    },
    Return {
        record_id: RecordId,
        returned_at: NaiveDate,
    },
    MarkLost {
        copy_id: CopyId,
    },
    MarkFound {
        copy_id: CopyId,
    },
    GetCopy {
        copy_id: CopyId,
    },
    /// Open records report the status they have as of `as_of` (default today).
    GetRecord {
        record_id: RecordId,
        #[serde(default)]
        as_of: Option<NaiveDate>,
    },
    ActiveLoans {
        #[serde(default)]
        as_of: Option<NaiveDate>,
    },
    OverdueLoans {
        as_of: NaiveDate,
    },
    UserHistory {
        user_id: UserId,
        #[serde(default)]
        as_of: Option<NaiveDate>,
    },
    CopyHistory {
        copy_id: CopyId,
        #[serde(default)]
        as_of: Option<NaiveDate>,
    },
}

impl LedgerRequest {
    /// Whether a successful outcome creates an entity.
    pub fn creates(&self) -> bool {
        matches!(self, Self::RegisterCopy { .. } | Self::Borrow { .. })
    }

    /// HTTP-equivalent status code on success.
    pub fn success_code(&self) -> u16 {
        if self.creates() { 201 } else { 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LedgerResponse {
    Copy(CopyInfo),
    Record(BorrowRecord),
    Records(Vec<BorrowRecord>),
}

/// Error body for rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub status: u16,
}

impl From<&LedgerError> for ErrorResponse {
    fn from(err: &LedgerError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
            status: err.class().status_code(),
        }
    }
}

impl<L: LedgerStore> Engine<L> {
    /// Executes one request.
    pub fn handle(&self, request: LedgerRequest) -> LedgerResult<LedgerResponse> {
        let response = match request {
            LedgerRequest::RegisterCopy { copy_id, title_id } => {
                LedgerResponse::Copy(self.register_copy(copy_id, title_id)?)
            }
            LedgerRequest::Borrow {
                user_id,
                copy_id,
                borrowed_at,
                loan_period_days,
            } => {
                let days = loan_period_days.unwrap_or(self.loan_period_days());
                LedgerResponse::Record(self.borrow(user_id, copy_id, borrowed_at, days)?)
            }
            LedgerRequest::Return {
                record_id,
                returned_at,
            } => LedgerResponse::Record(self.return_copy(record_id, returned_at)?),
            LedgerRequest::MarkLost { copy_id } => LedgerResponse::Copy(self.mark_lost(copy_id)?),
            LedgerRequest::MarkFound { copy_id } => {
                LedgerResponse::Copy(self.mark_found(copy_id)?)
            }
            LedgerRequest::GetCopy { copy_id } => LedgerResponse::Copy(self.copy(copy_id)?),
            LedgerRequest::GetRecord { record_id, as_of } => {
                let as_of = self.queries(as_of).as_of();
                LedgerResponse::Record(self.record_as_of(record_id, as_of)?)
            }
            LedgerRequest::ActiveLoans { as_of } => {
                let loans = self.queries(as_of);
                LedgerResponse::Records(loans.active_loans().into_iter().collect())
            }
            LedgerRequest::OverdueLoans { as_of } => {
                let loans = self.loans_as_of(as_of);
                LedgerResponse::Records(loans.overdue_loans(as_of).into_iter().collect())
            }
            LedgerRequest::UserHistory { user_id, as_of } => {
                let loans = self.queries(as_of);
                LedgerResponse::Records(loans.history_for_user(user_id).into_iter().collect())
            }
            LedgerRequest::CopyHistory { copy_id, as_of } => {
                // Unknown copies are reported rather than shown an empty history
                self.copy(copy_id)?;
                let loans = self.queries(as_of);
                LedgerResponse::Records(loans.history_for_copy(copy_id).into_iter().collect())
            }
        };
        Ok(response)
    }

    fn queries(&self, as_of: Option<NaiveDate>) -> crate::query::LoanQueries<'_, L> {
        match as_of {
            Some(date) => self.loans_as_of(date),
            None => self.loans(),
        }
    }
}

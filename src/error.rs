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

//! Error types for borrowing ledger operations.

use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced copy or record does not exist
    #[error("entity not found")]
    NotFound,

    /// Copy is not available for borrowing
    #[error("copy is already borrowed")]
    AlreadyBorrowed,

    /// Copy is not currently borrowed
    #[error("copy is not borrowed")]
    NotBorrowed,

    /// Copy has been marked lost
    #[error("copy is lost")]
    CopyLost,

    /// Copy is not marked lost
    #[error("copy is not lost")]
    NotLost,

    /// Copy ID is already registered
    #[error("duplicate copy ID")]
    DuplicateCopy,

    /// Record ID is already in the ledger
    #[error("duplicate record ID")]
    DuplicateRecord,

    /// Record is already in its terminal returned state
    #[error("record already returned")]
    AlreadyReturned,

    /// A date would violate borrowed/due/returned ordering
    #[error("invalid date (must not precede the borrow date)")]
    InvalidDate,

    /// Ledger already holds an open record for the copy
    #[error("copy already has an open loan")]
    DuplicateOpenLoan,

    /// Store did not respond within its timeout
    #[error("store unavailable")]
    StoreUnavailable,
}

/// How an error should be surfaced to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Request was malformed or violates a validation rule.
    Validation,
    /// Referenced entity is unknown.
    NotFound,
    /// Request conflicts with the current state.
    Conflict,
    /// Transient infrastructure failure, retryable with backoff.
    Unavailable,
}

impl ErrorClass {
    /// HTTP-equivalent status code.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::Validation => 422,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Unavailable => 503,
        }
    }
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::InvalidDate | LedgerError::AlreadyReturned => ErrorClass::Validation,
            LedgerError::NotFound => ErrorClass::NotFound,
            LedgerError::AlreadyBorrowed
            | LedgerError::NotBorrowed
            | LedgerError::CopyLost
            | LedgerError::NotLost
            | LedgerError::DuplicateCopy
            | LedgerError::DuplicateRecord
            | LedgerError::DuplicateOpenLoan => ErrorClass::Conflict,
            LedgerError::StoreUnavailable => ErrorClass::Unavailable,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound => "NOT_FOUND",
            LedgerError::AlreadyBorrowed => "ALREADY_BORROWED",
            LedgerError::NotBorrowed => "NOT_BORROWED",
            LedgerError::CopyLost => "COPY_LOST",
            LedgerError::NotLost => "NOT_LOST",
            LedgerError::DuplicateCopy => "DUPLICATE_COPY",
            LedgerError::DuplicateRecord => "DUPLICATE_RECORD",
            LedgerError::AlreadyReturned => "ALREADY_RETURNED",
            LedgerError::InvalidDate => "INVALID_DATE",
            LedgerError::DuplicateOpenLoan => "DUPLICATE_OPEN_LOAN",
            LedgerError::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Whether the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Unavailable
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

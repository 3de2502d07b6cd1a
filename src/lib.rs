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

//! # Borrow Ledger
//!
//! This library tracks physical book copies being lent to library members and
//! returned, enforcing that a copy is never out on two loans at once.
//!
//! ## Core Components
//!
//! - [`CopyRegistry`]: Availability state of every copy
//! - [`LedgerStore`]: Append/update store of [`BorrowRecord`]s, with [`MemoryLedger`]
//! - [`Engine`]: Borrow and return transitions across both stores
//! - [`LoanQueries`]: Read-only views with derived overdue status
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use borrow_ledger_rs::{BorrowStatus, CopyId, CopyState, Engine, TitleId, UserId};
//! use chrono::NaiveDate;
//!
//! let engine = Engine::new();
//! engine.register_copy(CopyId(1), TitleId(10)).unwrap();
//!
//! let jan = |d| NaiveDate::from_ymd_opt(2025, 1, d).unwrap();
//! let record = engine.borrow(UserId(1), CopyId(1), jan(1), 14).unwrap();
//! assert_eq!(record.due_at, jan(15));
//!
//! let overdue: Vec<_> = engine.loans_as_of(jan(20)).overdue_loans(jan(20)).into_iter().collect();
//! assert_eq!(overdue[0].status, BorrowStatus::Overdue);
//!
//! engine.return_copy(record.id, jan(20)).unwrap();
//! assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);
//! ```
//!
//! ## Thread Safety
//!
//! All operations take `&self`. Writes to the same copy are serialized by a
//! per-copy lock with a bounded wait; writes to different copies proceed in
//! parallel.

mod base;
pub mod config;
pub mod copy;
mod engine;
pub mod error;
mod handler;
mod journal;
pub mod ledger;
mod query;
mod record;
pub mod retry;
pub mod row;

pub use base::{CopyId, RecordId, TitleId, UserId};
pub use config::LedgerConfig;
pub use copy::{BookCopy, CopyInfo, CopyRegistry, CopyState};
pub use engine::Engine;
pub use error::{ErrorClass, LedgerError, LedgerResult};
pub use handler::{ErrorResponse, LedgerRequest, LedgerResponse};
pub use journal::{Journal, LedgerEvent};
pub use ledger::{LedgerStore, MemoryLedger, RecordFilter, RecordIter, RecordQuery};
pub use query::LoanQueries;
pub use record::{BorrowRecord, BorrowStatus, NewRecord, UnknownStatus, compute_status};
pub use row::BorrowRecordRow;

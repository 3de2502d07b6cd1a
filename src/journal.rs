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
use crate::error::LedgerError;
use chrono::NaiveDate;
use crossbeam::queue::SegQueue;
use serde::Serialize;

/// A committed ledger transition, or a rollback of a failed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LedgerEvent {
    Borrowed {
        record_id: RecordId,
        user_id: UserId,
        copy_id: CopyId,
        borrowed_at: NaiveDate,
        due_at: NaiveDate,
    },
    Returned {
        record_id: RecordId,
        copy_id: CopyId,
        returned_at: NaiveDate,
        late: bool,
    },
    /// A previously exported record was loaded back.
    Restored {
        record_id: RecordId,
        copy_id: CopyId,
        open: bool,
    },
    /// The first half of a two-step transition was undone.
    Compensated {
        copy_id: CopyId,
        record_id: Option<RecordId>,
        #[serde(serialize_with = "serialize_error")]
        cause: LedgerError,
    },
    Lost {
        copy_id: CopyId,
    },
    Found {
        copy_id: CopyId,
    },
}

fn serialize_error<S: serde::Serializer>(err: &LedgerError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(err.code())
}

/// Lock-free audit journal in commit order.
#[derive(Debug, Default)]
pub struct Journal {
    events: SegQueue<LedgerEvent>,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            events: SegQueue::new(),
        }
    }

    pub fn push(&self, event: LedgerEvent) {
        self.events.push(event);
    }

    /// Removes and returns every pending event, oldest first.
    pub fn drain(&self) -> Vec<LedgerEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

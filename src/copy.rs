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

//! Copy registry.
//!
//! Tracks the availability of every physical copy.
//!
//! # Example
//!
//! ```
//! use borrow_ledger_rs::{CopyId, CopyRegistry, CopyState, TitleId};
//!
//! let registry = CopyRegistry::new();
//! registry.register(CopyId(1), TitleId(7)).unwrap();
//! assert_eq!(registry.lookup(CopyId(1)).unwrap().state, CopyState::Available);
//! ```

use crate::base::{CopyId, TitleId};
use crate::error::{LedgerError, LedgerResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Availability of a copy.
///
//  Available ──borrow──► Borrowed ──return──► Available
//      │
//      └──lost──► Lost ──found──► Available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyState {
    Available,
    Borrowed,
    Lost,
}

/// Point-in-time view of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyInfo {
    pub copy_id: CopyId,
    pub title_id: TitleId,
    pub state: CopyState,
}

#[derive(Debug)]
struct CopyData {
    copy_id: CopyId,
    title_id: TitleId,
    state: CopyState,
}

impl CopyData {
    fn borrow(&mut self) -> LedgerResult<()> {
        match self.state {
            CopyState::Available => {
                self.state = CopyState::Borrowed;
                Ok(())
            }
            CopyState::Borrowed => Err(LedgerError::AlreadyBorrowed),
            CopyState::Lost => Err(LedgerError::CopyLost),
        }
    }

    fn give_back(&mut self) -> LedgerResult<()> {
        if self.state != CopyState::Borrowed {
            return Err(LedgerError::NotBorrowed);
        }
        self.state = CopyState::Available;
        Ok(())
    }

    /// Only a copy on the shelf can be written off.
    fn lose(&mut self) -> LedgerResult<()> {
        match self.state {
            CopyState::Available => {
                self.state = CopyState::Lost;
                Ok(())
            }
            CopyState::Borrowed => Err(LedgerError::AlreadyBorrowed),
            CopyState::Lost => Err(LedgerError::CopyLost),
        }
    }

    fn find(&mut self) -> LedgerResult<()> {
        if self.state != CopyState::Lost {
            return Err(LedgerError::NotLost);
        }
        self.state = CopyState::Available;
        Ok(())
    }

    fn info(&self) -> CopyInfo {
        CopyInfo {
            copy_id: self.copy_id,
            title_id: self.title_id,
            state: self.state,
        }
    }
}

/// A physical copy with its own lock.
#[derive(Debug)]
pub struct BookCopy {
    inner: Mutex<CopyData>,
}

impl BookCopy {
    pub fn new(copy_id: CopyId, title_id: TitleId) -> Self {
        Self {
            inner: Mutex::new(CopyData {
                copy_id,
                title_id,
                state: CopyState::Available,
            }),
        }
    }

    pub fn state(&self) -> CopyState {
        self.inner.lock().state
    }

    pub fn info(&self) -> CopyInfo {
        self.inner.lock().info()
    }
}

/// Registry of copies indexed by copy ID.
#[derive(Debug, Default)]
pub struct CopyRegistry {
    copies: DashMap<CopyId, BookCopy>,
}

impl CopyRegistry {
    pub fn new() -> Self {
        Self {
            copies: DashMap::new(),
        }
    }

    /// Adds a new copy in the `Available` state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateCopy`] if the copy ID is already known.
    pub fn register(&self, copy_id: CopyId, title_id: TitleId) -> LedgerResult<CopyInfo> {
        match self.copies.entry(copy_id) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateCopy),
            Entry::Vacant(entry) => {
                let copy = BookCopy::new(copy_id, title_id);
                let info = copy.info();
                entry.insert(copy);
                Ok(info)
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown copy.
    pub fn lookup(&self, copy_id: CopyId) -> LedgerResult<CopyInfo> {
        self.copies
            .get(&copy_id)
            .map(|copy| copy.info())
            .ok_or(LedgerError::NotFound)
    }

    /// Moves a copy from `Available` to `Borrowed`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown copy.
    /// - [`LedgerError::AlreadyBorrowed`] - Copy is already out.
    /// - [`LedgerError::CopyLost`] - Copy is marked lost.
    pub fn mark_borrowed(&self, copy_id: CopyId) -> LedgerResult<()> {
        self.transition(copy_id, CopyData::borrow)
    }

    /// Moves a copy from `Borrowed` back to `Available`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown copy.
    /// - [`LedgerError::NotBorrowed`] - Copy is not out.
    pub fn mark_returned(&self, copy_id: CopyId) -> LedgerResult<()> {
        self.transition(copy_id, CopyData::give_back)
    }

    pub fn mark_lost(&self, copy_id: CopyId) -> LedgerResult<()> {
        self.transition(copy_id, CopyData::lose)
    }

    pub fn mark_found(&self, copy_id: CopyId) -> LedgerResult<()> {
        self.transition(copy_id, CopyData::find)
    }

    pub fn copies(&self) -> impl Iterator<Item = CopyInfo> + '_ {
        self.copies.iter().map(|copy| copy.info())
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    fn transition(
        &self,
        copy_id: CopyId,
        apply: impl FnOnce(&mut CopyData) -> LedgerResult<()>,
    ) -> LedgerResult<()> {
        let copy = self.copies.get(&copy_id).ok_or(LedgerError::NotFound)?;
        let mut data = copy.inner.lock();
        apply(&mut *data)
    }
}

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

//! Engine configuration.
//!
//! Values are layered: built-in defaults, then an optional file, then
//! `BORROW_LEDGER_*` environment variables. Nested keys use a double
//! underscore, e.g. `BORROW_LEDGER_RETRY__MAX_ATTEMPTS=5`.

use crate::retry::{RetryConfig, RetryPolicy};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "BORROW_LEDGER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Days between the borrow date and the due date.
    pub loan_period_days: u32,
    /// Upper bound on waiting for a copy's write lock.
    pub store_timeout_ms: u64,
    pub retry: RetryConfig,
    /// Default `tracing` filter directive for binaries.
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            loan_period_days: 14,
            store_timeout_ms: 250,
            retry: RetryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Loads configuration, reading `path` if given (TOML, YAML or JSON by extension).
    ///
    /// # Errors
    ///
    /// Fails if a source can not be read or parsed, or if the retry settings
    /// are out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()
            .and_then(Self::validated)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.retry.validate().map_err(ConfigError::Message)?;
        Ok(self)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}

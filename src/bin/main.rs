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

use borrow_ledger_rs::{
    BorrowRecordRow, CopyId, Engine, LedgerConfig, LedgerRequest, LedgerStore, RecordFilter,
    RecordId, TitleId, UserId,
};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "borrow-ledger-rs")]
#[command(about = "Replays a CSV of library loan operations and prints borrow_records rows", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,user,copy,title,record,date,days
    /// Example: cargo run -- operations.csv > borrow_records.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Date used to derive overdue statuses (defaults to today, UTC)
    #[arg(long, value_name = "YYYY-MM-DD")]
    as_of: Option<NaiveDate>,

    /// borrow_records CSV loaded before the operations are replayed
    ///
    /// Copies referenced only here are registered under title 0.
    #[arg(long, value_name = "FILE")]
    records: Option<PathBuf>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let config = match LedgerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    // Logs go to stderr; stdout carries the CSV output.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::from_config(&config);

    if let Some(path) = &args.records {
        let restored = File::open(path)
            .map_err(csv::Error::from)
            .and_then(|file| import_records(&engine, BufReader::new(file)));
        match restored {
            Ok(count) => info!(count, path = %path.display(), "records imported"),
            Err(e) => {
                eprintln!("Error importing records from '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
    }

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = process_operations(&engine, BufReader::new(file)) {
        eprintln!("Error processing operations: {}", e);
        process::exit(1);
    }

    let events = engine.drain_events();
    info!(events = events.len(), "replay finished");
    for event in &events {
        debug!(?event, "journal");
    }

    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    if let Err(e) = write_records(&engine, as_of, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

#[derive(Debug, Deserialize)]
struct CsvOperation {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    user: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    copy: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    title: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    record: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    date: Option<NaiveDate>,
    #[serde(deserialize_with = "csv::invalid_option")]
    days: Option<u32>,
}

impl CsvOperation {
    /// Converts a CSV row to a request.
    ///
    /// Returns `None` for unknown operations or missing required fields.
    fn into_request(self) -> Option<LedgerRequest> {
        match self.op.to_lowercase().as_str() {
            "register" => Some(LedgerRequest::RegisterCopy {
                copy_id: CopyId(self.copy?),
                title_id: TitleId(self.title?),
            }),
            "borrow" => Some(LedgerRequest::Borrow {
                user_id: UserId(self.user?),
                copy_id: CopyId(self.copy?),
                borrowed_at: self.date?,
                loan_period_days: self.days,
            }),
            "return" => Some(LedgerRequest::Return {
                record_id: RecordId(self.record?),
                returned_at: self.date?,
            }),
            "lost" => Some(LedgerRequest::MarkLost {
                copy_id: CopyId(self.copy?),
            }),
            "found" => Some(LedgerRequest::MarkFound {
                copy_id: CopyId(self.copy?),
            }),
            _ => None,
        }
    }
}

/// Replays every operation in `reader`. Rejected operations are logged and skipped.
pub fn process_operations<L: LedgerStore, R: Read>(
    engine: &Engine<L>,
    reader: R,
) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvOperation>().enumerate() {
        let row = line + 2;
        match result {
            Ok(operation) => {
                let Some(request) = operation.into_request() else {
                    warn!(row, "skipping invalid operation");
                    continue;
                };
                if let Err(e) = engine.handle(request) {
                    warn!(row, error = %e, code = e.code(), "operation rejected");
                }
            }
            Err(e) => {
                warn!(row, error = %e, "skipping malformed row");
            }
        }
    }

    Ok(())
}

/// Title assigned to copies that appear in imported records but were never registered.
const UNKNOWN_TITLE: TitleId = TitleId(0);

/// Loads `borrow_records` rows into the ledger. Rejected rows are logged and skipped.
///
/// Returns the number of records restored.
pub fn import_records<L: LedgerStore, R: Read>(
    engine: &Engine<L>,
    reader: R,
) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut restored = 0;
    for (line, result) in rdr.deserialize::<BorrowRecordRow>().enumerate() {
        let row = line + 2;
        let record = match result.map(BorrowRecordRow::into_record) {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!(row, error = %e, "skipping inconsistent record");
                continue;
            }
            Err(e) => {
                warn!(row, error = %e, "skipping malformed record row");
                continue;
            }
        };

        let copy_id = record.copy_id;
        if engine.copy(copy_id).is_err() {
            debug!(%copy_id, "registering copy seen only in records");
            // Registration can only fail as a duplicate, which is fine here
            let _ = engine.register_copy(copy_id, UNKNOWN_TITLE);
        }
        match engine.restore_record(record) {
            Ok(_) => restored += 1,
            Err(e) => warn!(row, error = %e, code = e.code(), "record rejected"),
        }
    }

    Ok(restored)
}

/// Writes every record as a `borrow_records` row, with statuses as of `as_of`.
pub fn write_records<L: LedgerStore, W: Write>(
    engine: &Engine<L>,
    as_of: NaiveDate,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for record in engine.loans_as_of(as_of).matching(RecordFilter::new()) {
        wtr.serialize(BorrowRecordRow::from(&record))?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use borrow_ledger_rs::{BorrowStatus, CopyState};
    use std::io::Cursor;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn replay(csv: &str) -> Engine {
        let engine = Engine::new();
        process_operations(&engine, Cursor::new(csv.to_string())).unwrap();
        engine
    }

    #[test]
    fn parse_register_and_borrow() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             borrow,7,1,,,2025-01-01,14\n",
        );

        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
        let record = engine.record(RecordId(1)).unwrap();
        assert_eq!(record.user_id, UserId(7));
        assert_eq!(record.due_at, date(2025, 1, 15));
    }

    #[test]
    fn borrow_without_days_uses_default_period() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             borrow,7,1,,,2025-01-01,\n",
        );
        assert_eq!(engine.record(RecordId(1)).unwrap().due_at, date(2025, 1, 15));
    }

    #[test]
    fn parse_borrow_and_return() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             borrow,7,1,,,2025-01-01,14\n\
             return,,,,1,2025-01-20,\n",
        );

        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);
        let record = engine.record(RecordId(1)).unwrap();
        assert_eq!(record.status, BorrowStatus::Returned);
        assert_eq!(record.returned_at, Some(date(2025, 1, 20)));
    }

    #[test]
    fn parse_with_whitespace() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
              register , , 1 , 10 , , ,\n\
              borrow , 7 , 1 , , , 2025-01-01 , 14 \n",
        );
        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
    }

    #[test]
    fn rejected_operations_are_skipped() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             borrow,7,1,,,2025-01-01,14\n\
             borrow,8,1,,,2025-01-02,14\n\
             bogus,row,data,here,,,\n\
             borrow,8,,,,2025-01-02,14\n",
        );

        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(engine.record(RecordId(1)).unwrap().user_id, UserId(7));
    }

    #[test]
    fn lost_and_found() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             lost,,1,,,,\n\
             borrow,7,1,,,2025-01-01,14\n",
        );
        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Lost);
        assert!(engine.ledger().is_empty());

        let found = "op,user,copy,title,record,date,days\nfound,,1,,,,\n";
        process_operations(&engine, Cursor::new(found)).unwrap();
        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Available);
    }

    #[test]
    fn write_records_to_csv() {
        let engine = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             register,,2,10,,,\n\
             borrow,7,1,,,2025-01-01,14\n\
             borrow,8,2,,,2025-01-10,14\n\
             return,,,,2,2025-01-12,\n",
        );

        let mut output = Vec::new();
        write_records(&engine, date(2025, 1, 20), &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(
            lines[0],
            "id,user_id,book_copy_id,borrowed_at,due_at,returned_at,status,created_at,updated_at"
        );
        assert!(lines[1].starts_with("1,7,1,2025-01-01,2025-01-15,,overdue,"));
        assert!(lines[2].starts_with("2,8,2,2025-01-10,2025-01-24,2025-01-12,returned,"));
    }

    #[test]
    fn exported_records_import_into_a_fresh_engine() {
        let source = replay(
            "op,user,copy,title,record,date,days\n\
             register,,1,10,,,\n\
             register,,2,10,,,\n\
             borrow,7,1,,,2025-01-01,14\n\
             borrow,8,2,,,2025-01-10,14\n\
             return,,,,2,2025-01-12,\n",
        );
        let mut exported = Vec::new();
        write_records(&source, date(2025, 1, 20), &mut exported).unwrap();

        let engine = Engine::new();
        let count = import_records(&engine, Cursor::new(exported.clone())).unwrap();
        assert_eq!(count, 2);

        // The overdue status in the export is derived, the import stores an open loan
        let open = engine.record(RecordId(1)).unwrap();
        assert_eq!(open.status, BorrowStatus::Borrowed);
        assert_eq!(open.returned_at, None);
        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
        assert_eq!(engine.copy(CopyId(1)).unwrap().title_id, UNKNOWN_TITLE);
        assert_eq!(engine.record(RecordId(2)).unwrap().status, BorrowStatus::Returned);
        assert_eq!(engine.copy(CopyId(2)).unwrap().state, CopyState::Available);

        let mut again = Vec::new();
        write_records(&engine, date(2025, 1, 20), &mut again).unwrap();
        assert_eq!(again, exported);

        // Operations continue from the imported state
        process_operations(
            &engine,
            Cursor::new(
                "op,user,copy,title,record,date,days\n\
                 return,,,,1,2025-01-20,\n\
                 borrow,9,2,,,2025-01-21,14\n",
            ),
        )
        .unwrap();
        assert_eq!(engine.record(RecordId(1)).unwrap().status, BorrowStatus::Returned);
        assert_eq!(engine.record(RecordId(3)).unwrap().user_id, UserId(9));
    }

    #[test]
    fn import_skips_inconsistent_rows() {
        let engine = Engine::new();
        engine.register_copy(CopyId(1), TitleId(10)).unwrap();
        let csv = "id,user_id,book_copy_id,borrowed_at,due_at,returned_at,status,created_at,updated_at\n\
                   1,7,1,2025-01-01,2025-01-15,,borrowed,2025-01-01T00:00:00Z,2025-01-01T00:00:00Z\n\
                   2,7,1,2025-01-02,2025-01-16,,borrowed,2025-01-02T00:00:00Z,2025-01-02T00:00:00Z\n\
                   3,7,1,2025-01-05,2025-01-01,2025-01-06,returned,2025-01-05T00:00:00Z,2025-01-06T00:00:00Z\n\
                   4,7,1,2025-01-05,2025-01-19,,returned,2025-01-05T00:00:00Z,2025-01-05T00:00:00Z\n\
                   not,a,record,,,,,,\n";

        let count = import_records(&engine, Cursor::new(csv)).unwrap();

        assert_eq!(count, 1);
        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(engine.copy(CopyId(1)).unwrap().title_id, TitleId(10));
        assert_eq!(engine.copy(CopyId(1)).unwrap().state, CopyState::Borrowed);
    }
}

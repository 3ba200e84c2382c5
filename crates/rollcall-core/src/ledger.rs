//! Persistent attendance ledger: one row per identity, one column per date.
//!
//! Stored as CSV with an `Identity` key column followed by `YYYY-MM-DD`
//! columns in first-seen order. Cells hold `HH:MM:SS` or are empty. The
//! whole table is read into memory and rewritten after every mutation.

use crate::types::Identity;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::path::{Path, PathBuf};
use thiserror::Error;

const KEY_HEADER: &str = "Identity";
/// Header label written by older ledgers; accepted on read.
const LEGACY_KEY_HEADER: &str = "Name";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ledger {path} (line {line}): {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// One identity's attendance across all ledger dates.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub identity: Identity,
    /// One cell per ledger date, aligned with [`AttendanceLedger::dates`].
    pub cells: Vec<Option<NaiveTime>>,
}

/// In-memory attendance table with write-through persistence.
#[derive(Debug)]
pub struct AttendanceLedger {
    path: PathBuf,
    dates: Vec<NaiveDate>,
    rows: Vec<LedgerRow>,
}

impl AttendanceLedger {
    /// Create an empty ledger file (header only) if none exists.
    pub fn ensure_initialized(path: &Path) -> Result<(), LedgerError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let empty = Self {
            path: path.to_path_buf(),
            dates: Vec::new(),
            rows: Vec::new(),
        };
        empty.persist()?;
        tracing::info!(path = %path.display(), "created empty attendance ledger");
        Ok(())
    }

    /// Open the ledger at `path`, creating it if missing.
    ///
    /// A present but malformed file is an error; it is never repaired.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        Self::ensure_initialized(&path)?;

        let text = std::fs::read_to_string(&path).map_err(|source| LedgerError::Io {
            path: path.clone(),
            source,
        })?;
        let ledger = parse(&path, &text)?;
        tracing::info!(
            path = %path.display(),
            rows = ledger.rows.len(),
            dates = ledger.dates.len(),
            "attendance ledger opened"
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.rows.iter().map(|r| &r.identity)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.row_index(identity).is_some()
    }

    /// Recorded time for `identity` on `date`, if any.
    pub fn time_of(&self, identity: &str, date: NaiveDate) -> Option<NaiveTime> {
        let col = self.date_index(date)?;
        let row = self.row_index(identity)?;
        self.rows[row].cells[col]
    }

    /// Identities with a recorded time on `date`, in ledger order.
    pub fn present_on(&self, date: NaiveDate) -> Vec<(Identity, NaiveTime)> {
        let Some(col) = self.date_index(date) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|r| r.cells[col].map(|t| (r.identity.clone(), t)))
            .collect()
    }

    /// Add an empty row for every identity not yet in the ledger.
    ///
    /// Existing rows and timestamps are untouched. Returns the number of rows
    /// added; the file is only rewritten when that number is non-zero.
    pub fn reconcile<'a, I>(&mut self, known: I) -> Result<usize, LedgerError>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        let mut added = 0usize;
        for identity in known {
            if self.contains(identity) {
                continue;
            }
            self.rows.push(LedgerRow {
                identity: identity.clone(),
                cells: vec![None; self.dates.len()],
            });
            added += 1;
        }

        if added > 0 {
            self.persist()?;
            tracing::info!(added, rows = self.rows.len(), "reconciled ledger with roster");
        }
        Ok(added)
    }

    /// Record `identity` as present at `at`.
    ///
    /// Adds the date column on first use. A later record on the same date
    /// overwrites the earlier time. Unknown identities get a new row.
    pub fn record(&mut self, identity: &str, at: NaiveDateTime) -> Result<(), LedgerError> {
        let date = at.date();
        let time = truncate_to_seconds(at.time());

        let col = match self.date_index(date) {
            Some(col) => col,
            None => {
                self.dates.push(date);
                for row in &mut self.rows {
                    row.cells.push(None);
                }
                self.dates.len() - 1
            }
        };

        match self.row_index(identity) {
            Some(row) => {
                let previous = self.rows[row].cells[col].replace(time);
                if let Some(prev) = previous {
                    tracing::debug!(identity, %date, %prev, "overwriting earlier attendance");
                }
            }
            None => {
                let mut cells = vec![None; self.dates.len()];
                cells[col] = Some(time);
                self.rows.push(LedgerRow {
                    identity: identity.to_string(),
                    cells,
                });
            }
        }

        self.persist()?;
        tracing::info!(identity, %date, %time, "attendance recorded");
        Ok(())
    }

    fn date_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.iter().position(|d| *d == date)
    }

    fn row_index(&self, identity: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.identity == identity)
    }

    /// Rewrite the whole table to disk.
    fn persist(&self) -> Result<(), LedgerError> {
        std::fs::write(&self.path, self.to_csv()).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Render the table as CSV text.
    pub fn to_csv(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);

        let mut header = vec![KEY_HEADER.to_string()];
        header.extend(self.dates.iter().map(|d| d.format(DATE_FORMAT).to_string()));
        lines.push(join_record(&header));

        for row in &self.rows {
            let mut fields = vec![row.identity.clone()];
            fields.extend(row.cells.iter().map(|c| {
                c.map(|t| t.format(TIME_FORMAT).to_string())
                    .unwrap_or_default()
            }));
            lines.push(join_record(&fields));
        }

        lines.join("\n") + "\n"
    }
}

fn truncate_to_seconds(time: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    time.with_nanosecond(0).unwrap_or(time)
}

fn parse(path: &Path, text: &str) -> Result<AttendanceLedger, LedgerError> {
    let malformed = |line: usize, reason: String| LedgerError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let records = split_records(text).map_err(|(line, reason)| malformed(line, reason))?;
    let mut records = records.into_iter();

    let (header_line, header) = records
        .next()
        .ok_or_else(|| malformed(1, "missing header row".into()))?;

    let key = header.first().map(String::as_str).unwrap_or_default();
    if key != KEY_HEADER && key != LEGACY_KEY_HEADER {
        return Err(malformed(
            header_line,
            format!("first column must be `{KEY_HEADER}`, found `{key}`"),
        ));
    }

    let mut dates = Vec::with_capacity(header.len().saturating_sub(1));
    for cell in &header[1..] {
        let date = NaiveDate::parse_from_str(cell, DATE_FORMAT)
            .map_err(|_| malformed(header_line, format!("date column `{cell}` is not YYYY-MM-DD")))?;
        if dates.contains(&date) {
            return Err(malformed(header_line, format!("duplicate date column `{cell}`")));
        }
        dates.push(date);
    }

    let mut rows: Vec<LedgerRow> = Vec::new();
    for (line, fields) in records {
        if fields.len() > dates.len() + 1 {
            return Err(malformed(
                line,
                format!("{} fields, header has {}", fields.len(), dates.len() + 1),
            ));
        }
        let mut fields = fields.into_iter();
        let identity = fields.next().unwrap_or_default();
        if rows.iter().any(|r| r.identity == identity) {
            return Err(malformed(line, format!("duplicate identity `{identity}`")));
        }

        let mut cells = Vec::with_capacity(dates.len());
        for cell in fields {
            if cell.is_empty() {
                cells.push(None);
                continue;
            }
            let time = NaiveTime::parse_from_str(&cell, TIME_FORMAT)
                .map_err(|_| malformed(line, format!("cell `{cell}` is not HH:MM:SS")))?;
            cells.push(Some(time));
        }
        cells.resize(dates.len(), None);

        rows.push(LedgerRow { identity, cells });
    }

    Ok(AttendanceLedger {
        path: path.to_path_buf(),
        dates,
        rows,
    })
}

/// Split CSV text into records of fields, tagged with their starting line.
///
/// Blank lines are skipped. Quoted fields may contain separators, doubled
/// quotes, and line breaks.
fn split_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, (usize, String)> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut record_line = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                if !(fields.len() == 1 && fields[0].is_empty()) {
                    records.push((record_line, std::mem::take(&mut fields)));
                }
                fields.clear();
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err((record_line, "unterminated quoted field".into()));
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }
    Ok(records)
}

fn join_record(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn day(date: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap()
    }

    fn names(list: &[&str]) -> Vec<Identity> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_open_creates_missing_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/attendance.csv");

        let ledger = AttendanceLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.dates().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Identity\n");
    }

    #[test]
    fn test_ensure_initialized_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Identity,2026-01-05\nalice,08:00:00\n").unwrap();

        AttendanceLedger::ensure_initialized(&path).unwrap();
        AttendanceLedger::ensure_initialized(&path).unwrap();

        let ledger = AttendanceLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path().join("a.csv")).unwrap();
        let roster = names(&["alice", "bob"]);

        assert_eq!(ledger.reconcile(&roster).unwrap(), 2);
        assert_eq!(ledger.reconcile(&roster).unwrap(), 0);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.rows().iter().all(|r| r.cells.iter().all(Option::is_none)));
    }

    #[test]
    fn test_reconcile_preserves_existing_timestamps() {
        let dir = TempDir::new().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path().join("a.csv")).unwrap();
        ledger.record("alice", at("2026-03-02", "09:15:00")).unwrap();

        let added = ledger.reconcile(&names(&["alice", "bob"])).unwrap();
        assert_eq!(added, 1);
        assert_eq!(
            ledger.time_of("alice", day("2026-03-02")),
            NaiveTime::from_hms_opt(9, 15, 0)
        );
        assert_eq!(ledger.time_of("bob", day("2026-03-02")), None);
    }

    #[test]
    fn test_same_day_record_keeps_one_cell_last_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        let mut ledger = AttendanceLedger::open(&path).unwrap();

        ledger.record("alice", at("2026-03-02", "08:00:00")).unwrap();
        ledger.record("alice", at("2026-03-02", "17:30:05")).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.dates().len(), 1);
        assert_eq!(
            ledger.time_of("alice", day("2026-03-02")),
            NaiveTime::from_hms_opt(17, 30, 5)
        );

        let reopened = AttendanceLedger::open(&path).unwrap();
        assert_eq!(reopened.rows(), ledger.rows());
    }

    #[test]
    fn test_distinct_days_get_distinct_columns() {
        let dir = TempDir::new().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path().join("a.csv")).unwrap();
        ledger.reconcile(&names(&["alice", "bob"])).unwrap();

        ledger.record("alice", at("2026-03-02", "08:00:00")).unwrap();
        ledger.record("alice", at("2026-03-03", "08:05:00")).unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.dates(), &[day("2026-03-02"), day("2026-03-03")]);
        assert!(ledger.time_of("alice", day("2026-03-02")).is_some());
        assert!(ledger.time_of("alice", day("2026-03-03")).is_some());
        assert_eq!(ledger.time_of("bob", day("2026-03-03")), None);
    }

    #[test]
    fn test_record_unknown_identity_appends_row() {
        let dir = TempDir::new().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path().join("a.csv")).unwrap();
        ledger.record("alice", at("2026-03-02", "08:00:00")).unwrap();
        ledger.record("zoe", at("2026-03-03", "10:00:00")).unwrap();

        let zoe = &ledger.rows()[1];
        assert_eq!(zoe.identity, "zoe");
        assert_eq!(zoe.cells, vec![None, NaiveTime::from_hms_opt(10, 0, 0)]);
        assert_eq!(ledger.present_on(day("2026-03-03")).len(), 1);
    }

    #[test]
    fn test_csv_layout_and_legacy_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "Name,2026-01-05\r\nalice,08:00:00\r\nbob\r\n").unwrap();

        let mut ledger = AttendanceLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        ledger.record("bob", at("2026-01-06", "09:01:02")).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Identity,2026-01-05,2026-01-06\nalice,08:00:00,\nbob,,09:01:02\n"
        );
    }

    #[test]
    fn test_identity_with_comma_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        let mut ledger = AttendanceLedger::open(&path).unwrap();
        ledger.record("Doe, \"JJ\"", at("2026-01-05", "08:00:00")).unwrap();

        let reopened = AttendanceLedger::open(&path).unwrap();
        assert!(reopened.contains("Doe, \"JJ\""));
    }

    #[test]
    fn test_malformed_ledgers_are_rejected() {
        let dir = TempDir::new().unwrap();
        let cases = [
            "",
            "Employee,2026-01-05\n",
            "Identity,yesterday\n",
            "Identity,2026-01-05,2026-01-05\n",
            "Identity,2026-01-05\nalice,08:00:00,extra\n",
            "Identity,2026-01-05\nalice,8am\n",
            "Identity\nalice\nalice\n",
            "Identity\n\"alice\n",
        ];
        for (i, text) in cases.iter().enumerate() {
            let path = dir.path().join(format!("bad{i}.csv"));
            std::fs::write(&path, text).unwrap();
            let result = AttendanceLedger::open(&path);
            assert!(
                matches!(result, Err(LedgerError::Malformed { .. })),
                "case {i} should be malformed: {text:?}"
            );
        }
    }
}

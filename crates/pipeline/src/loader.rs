//! Input capability: where raw recordings and their tables come from

use crate::Result;
use eegflow_signal::TimeSeriesBuffer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One recording: subject, task and optional run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Subject label, e.g. `sub-NDARAB793GL3`
    pub subject: String,
    /// Task name as it appears in file names
    pub task: String,
    /// Run label
    #[serde(default)]
    pub run: Option<String>,
}

impl TaskRequest {
    /// Request without a run
    #[must_use]
    pub fn new(subject: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            task: task.into(),
            run: None,
        }
    }

    /// Same request for a given run
    #[must_use]
    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = Some(run.into()).filter(|r: &String| !r.is_empty());
        self
    }
}

impl fmt::Display for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.task)?;
        if let Some(run) = &self.run {
            write!(f, "/run-{run}")?;
        }
        Ok(())
    }
}

/// Tab-separated table with a header row
///
/// Cells are kept as text; `n/a` and empty cells read as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Events table (`onset`, `duration`, `value` plus task-specific columns)
pub type EventTable = Table;

impl Table {
    /// Build from a header and rows
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    /// Parse TSV text; blank lines are skipped
    #[must_use]
    pub fn parse_tsv(text: &str) -> Self {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());
        let columns = lines
            .next()
            .map(|h| h.split('\t').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default();
        let rows = lines
            .map(|l| l.split('\t').map(|c| c.trim().to_string()).collect())
            .collect();
        Self { columns, rows }
    }

    /// Column names
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether the table has `name` as a column
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of data rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no data rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell text, `None` when missing or `n/a`
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        let cell = self.rows.get(row)?.get(col)?.as_str();
        (!cell.is_empty() && !cell.eq_ignore_ascii_case("n/a")).then_some(cell)
    }

    /// Cell parsed as a finite number
    #[must_use]
    pub fn get_f64(&self, row: usize, column: &str) -> Option<f64> {
        self.get(row, column)?
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }

    /// Rows whose `column` equals `value`
    pub fn rows_where<'a>(&'a self, column: &'a str, value: &'a str) -> impl Iterator<Item = usize> + 'a {
        (0..self.len()).filter(move |&r| self.get(r, column) == Some(value))
    }

    /// Stack tables; the column set is the union in first-seen order
    #[must_use]
    pub fn concat(tables: &[Self]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for table in tables {
            for col in &table.columns {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
        }
        let rows = tables
            .iter()
            .flat_map(|t| {
                (0..t.len()).map(|r| {
                    columns
                        .iter()
                        .map(|c| t.get(r, c).unwrap_or("n/a").to_string())
                        .collect()
                })
            })
            .collect();
        Self { columns, rows }
    }
}

/// Source of one recording and its side tables
///
/// Missing side tables are `Ok(None)`; missing metadata is an empty object.
pub trait RawLoader: Send + Sync {
    /// Continuous recording in volts
    fn load_raw(&self) -> Result<TimeSeriesBuffer>;

    /// Event table
    fn load_events(&self) -> Result<Option<EventTable>>;

    /// Channel table
    fn load_channels(&self) -> Result<Option<Table>>;

    /// Electrode position table
    fn load_electrodes(&self) -> Result<Option<Table>>;

    /// Recording metadata
    fn load_metadata(&self) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "onset\tduration\tvalue\tbackground\n\
                          1.5\tn/a\tstim_ON\t1\n\
                          \n\
                          3.0\t0\tbreak cnt\tn/a\r\n";

    #[test]
    fn test_parse_tsv() {
        let t = Table::parse_tsv(EVENTS);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(0, "value"), Some("stim_ON"));
        assert_eq!(t.get_f64(0, "onset"), Some(1.5));
        assert_eq!(t.get(0, "duration"), None);
        assert_eq!(t.get(1, "background"), None);
        assert_eq!(t.get(1, "value"), Some("break cnt"));
        assert_eq!(t.rows_where("value", "stim_ON").collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = Table::parse_tsv("onset\tvalue\n1\ta\n");
        let b = Table::parse_tsv("onset\textra\n2\tx\n");
        let c = Table::concat(&[a, b]);
        assert_eq!(c.columns(), ["onset", "value", "extra"]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(1, "value"), None);
        assert_eq!(c.get(1, "extra"), Some("x"));
    }

    #[test]
    fn test_request_display() {
        let r = TaskRequest::new("sub-01", "RestingState").with_run("2");
        assert_eq!(r.to_string(), "sub-01/RestingState/run-2");
        assert!(TaskRequest::new("s", "t").with_run("").run.is_none());
    }
}

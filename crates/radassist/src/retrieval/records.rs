//! Historical report records and the sources they are read from

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{Error, Result};

/// File names the Indiana University chest X-ray dataset ships its reports under
pub const WELL_KNOWN_REPORT_FILES: [&str; 4] =
  ["indiana_reports.csv", "reports.csv", "indiana_projections.csv", "projections.csv"];

/// One row as read from a source: its position and the configured fields
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
  pub row: usize,
  pub fields: BTreeMap<String, String>,
}

/// An indexed historical report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
  /// Row of the record in its source
  pub row: usize,
  /// Labelled field text, one `Field: text` line per non-blank field
  pub raw_text: String,
  /// Every configured field, blank when the source had no value
  pub fields: BTreeMap<String, String>,
}

impl ReportRecord {
  /// Build a record from a source row, or `None` when every field is blank
  pub fn from_row(row: SourceRow, field_order: &[String]) -> Option<Self> {
    let parts: Vec<String> = field_order
      .iter()
      .filter_map(|name| {
        let text = row.fields.get(name)?.trim();
        (!text.is_empty()).then(|| format!("{}: {text}", field_label(name)))
      })
      .collect();

    if parts.is_empty() {
      return None;
    }

    let mut fields = row.fields;
    for name in field_order {
      fields.entry(name.clone()).or_default();
    }

    Some(Self { row: row.row, raw_text: parts.join("\n"), fields })
  }
}

fn field_label(name: &str) -> String {
  let mut chars = name.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

/// Something historical reports can be read from
pub trait ReportSource {
  /// Human-readable origin, for logs
  fn describe(&self) -> String;

  fn rows(&self) -> Result<Vec<SourceRow>>;
}

/// Reports stored one per row in a CSV file with a header line
pub struct CsvReportSource {
  path: PathBuf,
  fields: Vec<String>,
}

impl CsvReportSource {
  pub fn new(path: impl Into<PathBuf>, fields: Vec<String>) -> Self {
    Self { path: path.into(), fields }
  }
}

impl ReportSource for CsvReportSource {
  fn describe(&self) -> String {
    self.path.display().to_string()
  }

  fn rows(&self) -> Result<Vec<SourceRow>> {
    let mut reader = csv::ReaderBuilder::new()
      .flexible(true)
      .from_path(&self.path)
      .map_err(|e| Error::report_source(&self.path, e))?;

    let headers = reader.headers().map_err(|e| Error::report_source(&self.path, e))?.clone();
    let columns: Vec<(String, usize)> = self
      .fields
      .iter()
      .filter_map(|field| {
        headers.iter().position(|header| header.trim() == field).map(|i| (field.clone(), i))
      })
      .collect();

    if columns.is_empty() {
      return Err(Error::report_source(
        &self.path,
        format!("none of the columns {:?} are present", self.fields),
      ));
    }
    bentley::verbose!("columns in {}: {:?}", self.path.display(), headers.iter().collect::<Vec<_>>());

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
      let record =
        record.map_err(|e| Error::report_source(&self.path, format!("row {row}: {e}")))?;
      let fields = columns
        .iter()
        .map(|(name, i)| (name.clone(), record.get(*i).unwrap_or_default().to_string()))
        .collect();
      rows.push(SourceRow { row, fields });
    }

    bentley::verbose!("read {} rows from {}", rows.len(), self.path.display());
    Ok(rows)
  }
}

/// Locate the reports CSV inside a dataset directory.
///
/// Prefers files named like the dataset's report tables; otherwise the first
/// CSV (in path order) whose header names one of `fields`.
pub fn find_reports_file(dataset_dir: &Path, fields: &[String]) -> Result<PathBuf> {
  if !dataset_dir.is_dir() {
    return Err(Error::report_source(dataset_dir, "dataset directory does not exist"));
  }

  let csv_files: Vec<PathBuf> = WalkDir::new(dataset_dir)
    .sort_by_file_name()
    .into_iter()
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_file())
    .map(|entry| entry.into_path())
    .filter(|path| {
      path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
    })
    .collect();

  let by_name = csv_files.iter().find(|path| {
    let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
    WELL_KNOWN_REPORT_FILES.iter().any(|known| name.contains(known))
  });
  if let Some(path) = by_name {
    bentley::verbose!("using reports file {}", path.display());
    return Ok(path.clone());
  }

  for path in &csv_files {
    if header_has_any(path, fields) {
      bentley::verbose!("using reports file {}", path.display());
      return Ok(path.clone());
    }
  }

  Err(Error::report_source(
    dataset_dir,
    format!("no CSV file with any of the columns {fields:?}"),
  ))
}

fn header_has_any(path: &Path, fields: &[String]) -> bool {
  let Ok(mut reader) = csv::Reader::from_path(path) else {
    return false;
  };
  match reader.headers() {
    Ok(headers) => headers.iter().any(|header| fields.iter().any(|f| f == header.trim())),
    Err(_) => false,
  }
}

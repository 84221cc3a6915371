use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::index::FlatIpIndex;
use super::records::ReportRecord;
use crate::{Error, Result};

/// An index together with the records its rows point at
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedIndex {
  pub index: FlatIpIndex,
  pub catalog: Vec<ReportRecord>,
}

impl LoadedIndex {
  pub fn len(&self) -> usize {
    self.catalog.len()
  }

  pub fn is_empty(&self) -> bool {
    self.catalog.is_empty()
  }
}

/// On-disk home of the index (bincode) and its catalog (JSON)
#[derive(Debug, Clone)]
pub struct IndexStore {
  index_path: PathBuf,
  catalog_path: PathBuf,
}

impl IndexStore {
  pub fn new(index_path: impl Into<PathBuf>, catalog_path: impl Into<PathBuf>) -> Self {
    Self { index_path: index_path.into(), catalog_path: catalog_path.into() }
  }

  pub fn index_path(&self) -> &Path {
    &self.index_path
  }

  pub fn catalog_path(&self) -> &Path {
    &self.catalog_path
  }

  /// Both artifacts are present
  pub fn exists(&self) -> bool {
    self.index_path.exists() && self.catalog_path.exists()
  }

  /// Write the index and catalog as one build.
  ///
  /// Both files are staged next to their targets first. The catalog is
  /// swapped in before the index, and restored if the index swap fails, so
  /// a failed save leaves the previous pair in place.
  pub fn save(&self, loaded: &LoadedIndex) -> Result<()> {
    let build_id: u64 = rand::random();

    let index_bytes =
      bincode::serialize(&IndexFile { build_id, index: &loaded.index }).map_err(Error::serialization)?;
    let catalog_json = serde_json::to_vec(&CatalogFile { build_id, records: &loaded.catalog })
      .map_err(Error::serialization)?;

    let staged_index = stage(&self.index_path, &index_bytes)?;
    let staged_catalog = stage(&self.catalog_path, &catalog_json)?;
    let previous_catalog = fs::read(&self.catalog_path).ok();

    staged_catalog.persist(&self.catalog_path).map_err(|e| e.error)?;
    if let Err(e) = staged_index.persist(&self.index_path) {
      self.restore_catalog(previous_catalog);
      return Err(e.error.into());
    }

    bentley::verbose!(
      "saved index to {} and catalog to {} (build {build_id:016x})",
      self.index_path.display(),
      self.catalog_path.display()
    );
    Ok(())
  }

  fn restore_catalog(&self, previous: Option<Vec<u8>>) {
    let restored = match previous {
      Some(bytes) => stage(&self.catalog_path, &bytes)
        .and_then(|staged| staged.persist(&self.catalog_path).map(|_| ()).map_err(|e| e.error.into())),
      None => fs::remove_file(&self.catalog_path).map_err(Error::from),
    };
    if let Err(e) = restored {
      bentley::warn!("could not restore {}: {e}", self.catalog_path.display());
    }
  }

  /// Restore both artifacts, or `None` when either is missing
  pub fn load(&self) -> Result<Option<LoadedIndex>> {
    if !self.exists() {
      return Ok(None);
    }

    let index_bytes = fs::read(&self.index_path)?;
    let index_file: StoredIndex = bincode::deserialize(&index_bytes).map_err(|e| {
      Error::corrupt_index(format!("cannot decode {}: {e}", self.index_path.display()))
    })?;
    index_file.index.validate()?;

    let catalog_json = fs::read(&self.catalog_path)?;
    let catalog_file: StoredCatalog = serde_json::from_slice(&catalog_json).map_err(|e| {
      Error::corrupt_index(format!("cannot decode {}: {e}", self.catalog_path.display()))
    })?;

    if index_file.build_id != catalog_file.build_id {
      return Err(Error::corrupt_index(format!(
        "{} and {} come from different builds",
        self.index_path.display(),
        self.catalog_path.display()
      )));
    }

    let (index, catalog) = (index_file.index, catalog_file.records);
    if index.len() != catalog.len() {
      return Err(Error::corrupt_index(format!(
        "index holds {} vectors but catalog holds {} records",
        index.len(),
        catalog.len()
      )));
    }

    Ok(Some(LoadedIndex { index, catalog }))
  }
}

#[derive(Serialize)]
struct IndexFile<'a> {
  build_id: u64,
  index: &'a FlatIpIndex,
}

#[derive(Serialize)]
struct CatalogFile<'a> {
  build_id: u64,
  records: &'a [ReportRecord],
}

#[derive(Deserialize)]
struct StoredIndex {
  build_id: u64,
  index: FlatIpIndex,
}

#[derive(Deserialize)]
struct StoredCatalog {
  build_id: u64,
  records: Vec<ReportRecord>,
}

/// Write `bytes` to a temp file in the target's directory
fn stage(target: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
  let dir = match target.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  fs::create_dir_all(dir)?;

  let mut staged = NamedTempFile::new_in(dir)?;
  staged.write_all(bytes)?;
  staged.as_file().sync_all()?;
  Ok(staged)
}

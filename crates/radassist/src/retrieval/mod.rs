//! Similarity search over historical radiology reports.
//!
//! Reports are embedded once at ingestion and persisted as a flat
//! inner-product index plus a JSON catalog. Queries embed the search text
//! and return the closest reports, best first.

pub mod embedder;
pub mod index;
pub mod records;
pub mod store;

use serde::Serialize;
use std::path::Path;

use crate::config::{Config, RetrievalConfig};
use crate::runtime::LazyModel;
use crate::{Error, Result};

pub use embedder::TextEmbedder;
pub use index::FlatIpIndex;
pub use records::{find_reports_file, CsvReportSource, ReportRecord, ReportSource, SourceRow};
pub use store::{IndexStore, LoadedIndex};

/// One ranked match for a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
  /// 1-based position in the result list
  pub rank: usize,
  pub similarity: f32,
  pub report: String,
  pub metadata: ReportRecord,
}

/// Whether the index is in memory
#[derive(Debug, Default)]
pub enum IndexState {
  #[default]
  Unloaded,
  Loaded(LoadedIndex),
}

impl IndexState {
  pub fn is_loaded(&self) -> bool {
    matches!(self, IndexState::Loaded(_))
  }

  pub fn loaded(&self) -> Option<&LoadedIndex> {
    match self {
      IndexState::Loaded(loaded) => Some(loaded),
      IndexState::Unloaded => None,
    }
  }

  /// Move to `Loaded`, trying `load` first and falling back to `build`
  pub fn ensure_loaded(
    &mut self,
    load: impl FnOnce() -> Result<Option<LoadedIndex>>,
    build: impl FnOnce() -> Result<LoadedIndex>,
  ) -> Result<&LoadedIndex> {
    if let IndexState::Unloaded = self {
      let loaded = match load()? {
        Some(loaded) => loaded,
        None => {
          bentley::info!("no report index found, building one");
          build()?
        }
      };
      *self = IndexState::Loaded(loaded);
    }

    self.loaded().ok_or_else(|| Error::corrupt_index("index unavailable after loading"))
  }
}

type EmbedderSlot = LazyModel<Box<dyn TextEmbedder>>;

pub struct RetrievalService {
  config: RetrievalConfig,
  store: IndexStore,
  embedder: EmbedderSlot,
  state: IndexState,
}

impl RetrievalService {
  /// Service whose embedder is built by `loader` on first use
  pub fn new(
    config: RetrievalConfig,
    store: IndexStore,
    loader: impl Fn() -> Result<Box<dyn TextEmbedder>> + Send + Sync + 'static,
  ) -> Self {
    Self { config, store, embedder: LazyModel::new(embedder::MODEL_NAME, loader), state: IndexState::Unloaded }
  }

  /// Service backed by the ONNX sentence embedder and the index paths in `config`
  #[cfg(feature = "onnx")]
  pub fn from_config(config: &Config, device: crate::runtime::Device) -> Self {
    let retrieval = config.retrieval.clone();
    let location = retrieval.embedder.clone();
    let max_len = retrieval.max_sequence_length;
    Self::new(retrieval, store_for(config), move || {
      let model = embedder::OnnxSentenceEmbedder::load(&location, device, max_len)?;
      Ok(Box::new(model) as Box<dyn TextEmbedder>)
    })
  }

  pub fn store(&self) -> &IndexStore {
    &self.store
  }

  pub fn is_loaded(&self) -> bool {
    self.state.is_loaded()
  }

  /// Number of indexed reports, when the index is in memory
  pub fn indexed_count(&self) -> Option<usize> {
    self.state.loaded().map(LoadedIndex::len)
  }

  /// Index every usable record from `source`, replacing any existing index.
  ///
  /// Returns the number of records indexed.
  pub fn ingest(&mut self, source: &dyn ReportSource) -> Result<usize> {
    let loaded = build_index(&self.config, &self.embedder, source)?;
    self.store.save(&loaded)?;

    let count = loaded.len();
    self.state = IndexState::Loaded(loaded);
    bentley::success!("indexed {count} reports");
    Ok(count)
  }

  /// Restore a persisted index. `Ok(false)` when none exists.
  pub fn load(&mut self) -> Result<bool> {
    match self.store.load()? {
      Some(loaded) => {
        bentley::info!("loaded report index with {} reports", loaded.len());
        self.state = IndexState::Loaded(loaded);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// The reports most similar to `query`, best first.
  ///
  /// Loads the persisted index, or builds one from the configured reports
  /// source, when nothing is in memory yet. `top_k` defaults to the
  /// configured value.
  pub fn retrieve(&mut self, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievalResult>> {
    let k = top_k.unwrap_or(self.config.top_k);

    let Self { config, store, embedder, state } = self;
    let loaded = state.ensure_loaded(
      || store.load(),
      || {
        let source = default_source(config)?;
        let loaded = build_index(config, embedder, &source)?;
        store.save(&loaded)?;
        Ok(loaded)
      },
    )?;
    if k == 0 {
      return Ok(Vec::new());
    }

    let mut query_vector = embedder
      .with(|model| model.embed(&[query.to_string()]))?
      .into_iter()
      .next()
      .ok_or_else(|| Error::model(embedder::MODEL_NAME, "no embedding returned for query"))?;
    index::normalize_l2(&mut query_vector);

    loaded
      .index
      .search(&query_vector, k)?
      .into_iter()
      .enumerate()
      .map(|(i, hit)| {
        let record = loaded.catalog.get(hit.position).ok_or_else(|| {
          Error::corrupt_index(format!("index row {} has no catalog entry", hit.position))
        })?;
        Ok(RetrievalResult {
          rank: i + 1,
          similarity: hit.score,
          report: record.raw_text.clone(),
          metadata: record.clone(),
        })
      })
      .collect()
  }
}

/// Index store at the paths named in `config`
pub fn store_for(config: &Config) -> IndexStore {
  IndexStore::new(config.index_path(), config.metadata_path())
}

/// The source the index is rebuilt from when none has been persisted
pub fn default_source(config: &RetrievalConfig) -> Result<CsvReportSource> {
  if let Some(path) = &config.reports_csv {
    return Ok(CsvReportSource::new(path, config.fields.clone()));
  }
  if let Some(dir) = &config.dataset_dir {
    let path = find_reports_file(dir, &config.fields)?;
    return Ok(CsvReportSource::new(path, config.fields.clone()));
  }
  Err(Error::config("no report index exists and neither reports_csv nor dataset_dir is configured"))
}

fn build_index(config: &RetrievalConfig, embedder: &EmbedderSlot, source: &dyn ReportSource) -> Result<LoadedIndex> {
  bentley::info!("reading reports from {}", source.describe());
  let rows = source.rows()?;
  let total = rows.len();

  let catalog: Vec<ReportRecord> =
    rows.into_iter().filter_map(|row| ReportRecord::from_row(row, &config.fields)).collect();
  bentley::verbose!("{} of {total} rows have report text", catalog.len());

  if catalog.is_empty() {
    return Err(Error::report_source(
      Path::new(&source.describe()),
      format!("no rows with text in any of {:?}", config.fields),
    ));
  }

  let texts: Vec<String> = catalog.iter().map(|record| record.raw_text.clone()).collect();
  let mut index: Option<FlatIpIndex> = None;

  for (n, chunk) in texts.chunks(config.batch_size.max(1)).enumerate() {
    let embeddings = embedder.with(|model| model.embed(chunk))?;
    if embeddings.len() != chunk.len() {
      return Err(Error::model(
        embedder::MODEL_NAME,
        format!("{} embeddings returned for {} texts", embeddings.len(), chunk.len()),
      ));
    }

    for mut embedding in embeddings {
      index::normalize_l2(&mut embedding);
      index.get_or_insert_with(|| FlatIpIndex::new(embedding.len())).add(&embedding)?;
    }
    bentley::verbose!("embedded batch {} ({} texts)", n + 1, chunk.len());
  }

  let index = index.ok_or_else(|| Error::model(embedder::MODEL_NAME, "no embeddings produced"))?;
  Ok(LoadedIndex { index, catalog })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  fn loaded_with(count: usize) -> LoadedIndex {
    let mut index = FlatIpIndex::new(1);
    let mut catalog = Vec::new();
    for row in 0..count {
      index.add(&[1.0]).unwrap();
      catalog.push(ReportRecord { row, raw_text: format!("Findings: {row}"), fields: BTreeMap::new() });
    }
    LoadedIndex { index, catalog }
  }

  #[test]
  fn test_ensure_loaded_prefers_persisted_index() -> Result<()> {
    let mut state = IndexState::Unloaded;
    let loaded = state.ensure_loaded(|| Ok(Some(loaded_with(2))), || panic!("should not build"))?;
    assert_eq!(loaded.len(), 2);
    assert!(state.is_loaded());
    Ok(())
  }

  #[test]
  fn test_ensure_loaded_builds_when_nothing_persisted() -> Result<()> {
    let mut state = IndexState::Unloaded;
    let loaded = state.ensure_loaded(|| Ok(None), || Ok(loaded_with(5)))?;
    assert_eq!(loaded.len(), 5);
    Ok(())
  }

  #[test]
  fn test_ensure_loaded_is_a_no_op_once_loaded() -> Result<()> {
    let mut state = IndexState::Loaded(loaded_with(1));
    let loaded = state.ensure_loaded(|| panic!("should not load"), || panic!("should not build"))?;
    assert_eq!(loaded.len(), 1);
    Ok(())
  }

  #[test]
  fn test_failed_build_leaves_state_unloaded() {
    let mut state = IndexState::Unloaded;
    let result = state.ensure_loaded(|| Ok(None), || Err(Error::config("no source")));
    assert!(result.is_err());
    assert!(!state.is_loaded());
  }

  #[test]
  fn test_default_source_needs_a_location() {
    let config = RetrievalConfig::default();
    assert!(matches!(default_source(&config), Err(Error::Config { .. })));
  }
}

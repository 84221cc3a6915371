//! Configuration management for radassist
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Files are YAML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::runtime::{DevicePreference, ModelLocation};
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RADASSIST_CONFIG";

const LOCAL_CONFIG_PATHS: [&str; 2] = ["radassist.yaml", ".radassist/config.yaml"];

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Root for persisted state; relative index paths resolve against it
  pub data_dir: PathBuf,
  /// Execution device for all three models
  pub device: DevicePreference,
  pub vision: VisionConfig,
  pub retrieval: RetrievalConfig,
  pub narrative: NarrativeConfig,
}

/// Pathology classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
  pub model: ModelLocation,
  /// Output labels, in model output order
  pub labels: Vec<String>,
  /// Minimum score for a label to count as a finding
  pub confidence_threshold: f32,
  /// Square input resolution in pixels
  pub resolution: u32,
  /// Apply a sigmoid to raw outputs (for exports that emit logits)
  pub apply_sigmoid: bool,
}

/// Report retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
  pub embedder: ModelLocation,
  /// Default number of similar reports returned per query
  pub top_k: usize,
  pub index_path: PathBuf,
  pub metadata_path: PathBuf,
  /// CSV columns concatenated into each report, in order
  pub fields: Vec<String>,
  /// Reports CSV used when the index has to be rebuilt on demand
  pub reports_csv: Option<PathBuf>,
  /// Dataset directory searched for a reports CSV when `reports_csv` is unset
  pub dataset_dir: Option<PathBuf>,
  /// Texts embedded per forward pass during ingestion
  pub batch_size: usize,
  /// Token limit per embedded text
  pub max_sequence_length: usize,
}

/// Narrative generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
  pub generator: ModelLocation,
  /// Token budget for report generation; chat replies use a fixed shorter one
  pub max_new_tokens: usize,
  pub temperature: f32,
  pub top_p: f32,
  /// Number of most recent chat messages folded into a prompt
  pub history_window: usize,
  /// Fixed sampling seed, for reproducible output
  pub seed: Option<u64>,
}

/// Labels of the torchxrayvision `densenet121-res224-all` classifier
pub const DEFAULT_PATHOLOGIES: [&str; 18] = [
  "Atelectasis",
  "Consolidation",
  "Infiltration",
  "Pneumothorax",
  "Edema",
  "Emphysema",
  "Fibrosis",
  "Effusion",
  "Pneumonia",
  "Pleural_Thickening",
  "Cardiomegaly",
  "Nodule",
  "Mass",
  "Hernia",
  "Lung Lesion",
  "Fracture",
  "Lung Opacity",
  "Enlarged Cardiomediastinum",
];

impl Default for Config {
  fn default() -> Self {
    Self {
      data_dir: PathBuf::from("data"),
      device: DevicePreference::Auto,
      vision: VisionConfig::default(),
      retrieval: RetrievalConfig::default(),
      narrative: NarrativeConfig::default(),
    }
  }
}

impl Default for VisionConfig {
  fn default() -> Self {
    Self {
      model: ModelLocation::local("models/densenet121-res224-all", "model.onnx"),
      labels: DEFAULT_PATHOLOGIES.iter().map(|label| label.to_string()).collect(),
      confidence_threshold: 0.5,
      resolution: 224,
      apply_sigmoid: false,
    }
  }
}

impl Default for RetrievalConfig {
  fn default() -> Self {
    Self {
      embedder: ModelLocation::hub("sentence-transformers/all-MiniLM-L6-v2", "onnx/model.onnx"),
      top_k: 3,
      index_path: PathBuf::from("report_index/reports.index"),
      metadata_path: PathBuf::from("report_index/metadata.json"),
      fields: vec!["findings".to_string(), "impression".to_string()],
      reports_csv: None,
      dataset_dir: None,
      batch_size: 32,
      max_sequence_length: 256,
    }
  }
}

impl Default for NarrativeConfig {
  fn default() -> Self {
    Self {
      generator: ModelLocation::hub("onnx-community/Qwen2.5-0.5B-Instruct", "onnx/model_q4.onnx"),
      max_new_tokens: 512,
      temperature: 0.7,
      top_p: 0.9,
      history_window: 6,
      seed: None,
    }
  }
}

impl Config {
  /// Load configuration from a file
  pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
      .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
    let config: Config = serde_yaml::from_str(&content)
      .map_err(|e| Error::config(format!("cannot parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
  }

  /// Load configuration from an explicit path, the environment, the working
  /// directory or the user config directory, falling back to defaults
  pub fn load(explicit: Option<&Path>) -> Result<Self> {
    if let Some(path) = explicit {
      return Self::load_from_file(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
      return Self::load_from_file(path);
    }

    for candidate in Self::candidate_paths() {
      if candidate.exists() {
        bentley::verbose!("using config {}", candidate.display());
        return Self::load_from_file(candidate);
      }
    }

    Ok(Self::default())
  }

  fn candidate_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = LOCAL_CONFIG_PATHS.iter().map(PathBuf::from).collect();
    if let Some(dir) = dirs::config_dir() {
      paths.push(dir.join("radassist").join("config.yaml"));
    }
    paths
  }

  /// Reject values the services cannot work with
  pub fn validate(&self) -> Result<()> {
    let threshold = self.vision.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
      return Err(Error::config(format!("confidence_threshold {threshold} is outside [0, 1]")));
    }
    if self.vision.resolution == 0 {
      return Err(Error::config("vision resolution must be positive"));
    }
    if self.vision.labels.is_empty() {
      return Err(Error::config("vision labels cannot be empty"));
    }
    if self.retrieval.fields.is_empty() {
      return Err(Error::config("retrieval fields cannot be empty"));
    }
    if self.retrieval.batch_size == 0 {
      return Err(Error::config("retrieval batch_size must be positive"));
    }
    let top_p = self.narrative.top_p;
    if !(top_p > 0.0 && top_p <= 1.0) {
      return Err(Error::config(format!("top_p {top_p} is outside (0, 1]")));
    }
    if self.narrative.temperature < 0.0 {
      return Err(Error::config("temperature cannot be negative"));
    }
    Ok(())
  }

  /// Resolve a persisted-state path against `data_dir`
  pub fn data_path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.data_dir.join(path)
    }
  }

  pub fn index_path(&self) -> PathBuf {
    self.data_path(&self.retrieval.index_path)
  }

  pub fn metadata_path(&self) -> PathBuf {
    self.data_path(&self.retrieval.metadata_path)
  }
}

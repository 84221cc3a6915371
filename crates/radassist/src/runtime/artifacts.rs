use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Where a model's files live.
///
/// With `repo` set, files are fetched from the Hugging Face hub (and cached
/// by it); otherwise they are read from `dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLocation {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo: Option<String>,
  #[serde(default)]
  pub dir: PathBuf,
  /// Model graph, relative to the repo root or `dir`
  pub file: String,
}

impl ModelLocation {
  pub fn local(dir: impl Into<PathBuf>, file: impl Into<String>) -> Self {
    Self { repo: None, dir: dir.into(), file: file.into() }
  }

  pub fn hub(repo: impl Into<String>, file: impl Into<String>) -> Self {
    Self { repo: Some(repo.into()), dir: PathBuf::new(), file: file.into() }
  }

  pub fn describe(&self) -> String {
    match &self.repo {
      Some(repo) => format!("{repo}/{}", self.file),
      None => self.dir.join(&self.file).display().to_string(),
    }
  }

  /// Path to the model graph
  pub fn model_path(&self) -> Result<PathBuf> {
    self.fetch(&self.file)
  }

  /// Path to a companion file (tokenizer, config) next to the model
  pub fn fetch(&self, name: &str) -> Result<PathBuf> {
    match &self.repo {
      Some(repo) => fetch_from_hub(repo, name),
      None => {
        let path = self.dir.join(name);
        if path.exists() {
          Ok(path)
        } else {
          Err(Error::config(format!("model file {} does not exist", path.display())))
        }
      }
    }
  }

  /// Like [`fetch`](Self::fetch) but for files a model may not ship
  pub fn fetch_optional(&self, name: &str) -> Option<PathBuf> {
    match self.fetch(name) {
      Ok(path) => Some(path),
      Err(e) => {
        bentley::verbose!("optional model file {name} unavailable: {e}");
        None
      }
    }
  }

  /// Fetch the `<model>_data` external weights file when the graph uses one
  pub fn ensure_external_data(&self) -> Option<PathBuf> {
    self.fetch_optional(&format!("{}_data", self.file))
  }
}

#[cfg(feature = "onnx")]
fn fetch_from_hub(repo: &str, name: &str) -> Result<PathBuf> {
  use hf_hub::api::sync::Api;

  let api = Api::new().map_err(|e| Error::config(format!("HF API initialization failed: {e}")))?;
  bentley::verbose!("fetching {repo}/{name}");
  api
    .model(repo.to_string())
    .get(name)
    .map_err(|e| Error::config(format!("failed to download {repo}/{name}: {e}")))
}

#[cfg(not(feature = "onnx"))]
fn fetch_from_hub(repo: &str, name: &str) -> Result<PathBuf> {
  Err(Error::config(format!("cannot fetch {repo}/{name}: built without model runtime support")))
}

use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Invalid image '{}': {reason}", path.display())]
  InvalidImage { path: PathBuf, reason: String },

  #[error("Unusable report source '{}': {reason}", path.display())]
  ReportSource { path: PathBuf, reason: String },

  #[error("Report index is corrupt: {message}")]
  CorruptIndex { message: String },

  #[error("{model} model ran out of device memory: {message}")]
  ResourceExhausted { model: &'static str, message: String },

  #[error("{model} model failed: {message}")]
  Model { model: &'static str, message: String },

  #[error("Configuration error: {message}")]
  Config { message: String },

  #[error("Serialization failed: {message}")]
  Serialization { message: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl Error {
  pub fn invalid_image(path: &Path, reason: impl Display) -> Self {
    Self::InvalidImage { path: path.to_path_buf(), reason: reason.to_string() }
  }

  pub fn report_source(path: &Path, reason: impl Display) -> Self {
    Self::ReportSource { path: path.to_path_buf(), reason: reason.to_string() }
  }

  pub fn corrupt_index(message: impl Into<String>) -> Self {
    Self::CorruptIndex { message: message.into() }
  }

  pub fn model(model: &'static str, message: impl Display) -> Self {
    Self::Model { model, message: message.to_string() }
  }

  pub fn config(message: impl Into<String>) -> Self {
    Self::Config { message: message.into() }
  }

  pub fn serialization(message: impl Display) -> Self {
    Self::Serialization { message: message.to_string() }
  }

  /// Classify a runtime failure from a model backend.
  ///
  /// Device allocation failures become `ResourceExhausted` so callers can
  /// tell them apart from every other model error.
  pub fn runtime(model: &'static str, err: impl Display) -> Self {
    let message = err.to_string();
    if is_out_of_memory(&message) {
      Self::ResourceExhausted { model, message }
    } else {
      Self::Model { model, message }
    }
  }

  pub fn is_resource_exhausted(&self) -> bool {
    matches!(self, Self::ResourceExhausted { .. })
  }

  pub fn is_input_error(&self) -> bool {
    matches!(self, Self::InvalidImage { .. } | Self::ReportSource { .. })
  }
}

/// Does a runtime error message describe a device allocation failure
pub fn is_out_of_memory(message: &str) -> bool {
  let lowered = message.to_lowercase();
  ["out of memory", "cudaerrormemoryallocation", "failed to allocate memory", "bfcarena"]
    .iter()
    .any(|needle| lowered.contains(needle))
}

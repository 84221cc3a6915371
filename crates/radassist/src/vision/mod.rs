//! Chest radiograph pathology classification

pub mod preprocess;
#[cfg(feature = "onnx")]
pub mod onnx;

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::VisionConfig;
use crate::runtime::{Device, LazyModel};
use crate::{Error, Result};

pub const MODEL_NAME: &str = "classifier";

/// A multi-label pathology classifier backend
pub trait PathologyModel: Send {
  /// One score per output label for a `[1, 1, R, R]` image tensor
  fn infer(&mut self, image: &Array4<f32>) -> Result<Vec<f32>>;

  /// Free per-request device memory. Called after every inference,
  /// successful or not.
  fn release_transient(&mut self) {}
}

/// Builds a classifier backend on a device
pub type PathologyLoader = Arc<dyn Fn(Device) -> Result<Box<dyn PathologyModel>> + Send + Sync>;

/// One label whose confidence reached the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
  #[serde(rename = "name")]
  pub pathology: String,
  pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  /// Findings at or above the threshold, highest confidence first
  #[serde(rename = "pathologies")]
  pub findings: Vec<Finding>,
  /// Rounded confidence for every known label
  pub all_predictions: BTreeMap<String, f32>,
  #[serde(rename = "detected_count")]
  pub num_findings: usize,
}

impl Prediction {
  /// Build a prediction from raw per-label scores
  pub fn from_scores(labels: &[String], scores: &[f32], threshold: f32) -> Self {
    let mut findings = Vec::new();
    let mut all_predictions = BTreeMap::new();

    for (label, &score) in labels.iter().zip(scores) {
      // unnamed outputs are placeholders for labels the weights never learned
      if label.is_empty() {
        continue;
      }
      all_predictions.insert(label.clone(), round3(score));
      if score >= threshold {
        findings.push(Finding { pathology: label.clone(), confidence: round3(score) });
      }
    }

    findings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let num_findings = findings.len();
    Self { findings, all_predictions, num_findings }
  }

  pub fn has_findings(&self) -> bool {
    !self.findings.is_empty()
  }

  pub fn finding_names(&self) -> Vec<&str> {
    self.findings.iter().map(|f| f.pathology.as_str()).collect()
  }
}

fn round3(value: f32) -> f32 {
  (value * 1000.0).round() / 1000.0
}

fn sigmoid(value: f32) -> f32 {
  1.0 / (1.0 + (-value).exp())
}

/// A backend bound to the device it was loaded on, able to rebuild itself
/// once on the fallback device after an allocation failure
struct DeviceBoundModel {
  device: Device,
  model: Box<dyn PathologyModel>,
  loader: PathologyLoader,
}

impl DeviceBoundModel {
  fn load(loader: PathologyLoader, device: Device) -> Result<Self> {
    match loader(device) {
      Ok(model) => Ok(Self { device, model, loader }),
      Err(e) if e.is_resource_exhausted() => {
        let Some(fallback) = device.fallback() else {
          return Err(e);
        };
        bentley::warn!("{MODEL_NAME} does not fit on {device} ({e}), loading on {fallback}");
        let model = loader(fallback)?;
        Ok(Self { device: fallback, model, loader })
      }
      Err(e) => Err(e),
    }
  }

  fn infer(&mut self, image: &Array4<f32>) -> Result<Vec<f32>> {
    let result = self.infer_once(image);

    match result {
      Err(e) if e.is_resource_exhausted() => {
        let Some(fallback) = self.device.fallback() else {
          return Err(e);
        };
        bentley::warn!("{MODEL_NAME} ran out of memory on {}, retrying on {fallback}", self.device);
        self.model = (self.loader)(fallback)?;
        self.device = fallback;
        self.infer_once(image)
      }
      other => other,
    }
  }

  fn infer_once(&mut self, image: &Array4<f32>) -> Result<Vec<f32>> {
    let result = self.model.infer(image);
    self.model.release_transient();
    result
  }
}

/// Classifies radiographs against a fixed pathology label set
pub struct ClassifierService {
  config: VisionConfig,
  model: LazyModel<DeviceBoundModel>,
}

impl ClassifierService {
  /// Service whose backend is built by `loader` on first use
  pub fn new(config: VisionConfig, device: Device, loader: PathologyLoader) -> Self {
    let model = LazyModel::new(MODEL_NAME, move || DeviceBoundModel::load(loader.clone(), device));
    Self { config, model }
  }

  /// Service backed by the ONNX classifier named in `config`
  #[cfg(feature = "onnx")]
  pub fn from_config(config: VisionConfig, device: Device) -> Self {
    let location = config.model.clone();
    let loader: PathologyLoader = Arc::new(move |device: Device| {
      let model = onnx::OnnxPathologyModel::load(&location, device)?;
      Ok(Box::new(model) as Box<dyn PathologyModel>)
    });
    Self::new(config, device, loader)
  }

  /// Device the backend currently runs on, once loaded
  pub fn device(&self) -> Option<Device> {
    if !self.model.is_loaded() {
      return None;
    }
    self.model.with(|bound| Ok(bound.device)).ok()
  }

  /// Classify the radiograph at `image_path`
  pub fn predict(&self, image_path: &Path) -> Result<Prediction> {
    let tensor = preprocess::load_image(image_path, self.config.resolution)?;

    let mut scores = self
      .model
      .with(|bound| bound.infer(&tensor))
      .inspect_err(|e| bentley::error!("prediction failed for {}: {e}", image_path.display()))?;

    if scores.len() != self.config.labels.len() {
      return Err(Error::model(
        MODEL_NAME,
        format!("model produced {} scores for {} labels", scores.len(), self.config.labels.len()),
      ));
    }

    if self.config.apply_sigmoid {
      scores.iter_mut().for_each(|score| *score = sigmoid(*score));
    }

    let prediction =
      Prediction::from_scores(&self.config.labels, &scores, self.config.confidence_threshold);
    bentley::verbose!(
      "{} finding(s) for {}: {:?}",
      prediction.num_findings,
      image_path.display(),
      prediction.finding_names()
    );
    Ok(prediction)
  }
}

//! Hand-written model doubles shared by the integration tests
#![allow(dead_code)]

use image::{GrayImage, Luma};
use ndarray::Array4;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use radassist::config::{NarrativeConfig, RetrievalConfig, VisionConfig};
use radassist::narrative::{NarrativeService, SamplingParams, TextGenerator};
use radassist::retrieval::{IndexStore, RetrievalService, TextEmbedder};
use radassist::runtime::Device;
use radassist::vision::{ClassifierService, PathologyLoader, PathologyModel};
use radassist::{Error, Result};

/// Keyword-count embedder: one dimension per vocabulary word plus a bias
pub const VOCABULARY: [&str; 8] =
  ["heart", "cardiomegaly", "effusion", "pleural", "lung", "clear", "edema", "pneumothorax"];

#[derive(Clone, Default)]
pub struct EmbedderProbe {
  pub loads: Arc<AtomicUsize>,
  pub calls: Arc<AtomicUsize>,
  pub texts: Arc<Mutex<Vec<String>>>,
}

impl EmbedderProbe {
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_text(&self) -> Option<String> {
    self.texts.lock().unwrap().last().cloned()
  }
}

pub struct KeywordEmbedder {
  probe: EmbedderProbe,
}

impl KeywordEmbedder {
  pub fn embed_one(text: &str) -> Vec<f32> {
    let lowered = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY.iter().map(|word| lowered.matches(word).count() as f32).collect();
    vector.push(0.05);
    vector
  }
}

impl TextEmbedder for KeywordEmbedder {
  fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    self.probe.calls.fetch_add(1, Ordering::SeqCst);
    self.probe.texts.lock().unwrap().extend(texts.iter().cloned());
    Ok(texts.iter().map(|text| Self::embed_one(text)).collect())
  }
}

pub fn retrieval_config(dir: &Path) -> RetrievalConfig {
  RetrievalConfig {
    index_path: dir.join("index/reports.index"),
    metadata_path: dir.join("index/metadata.json"),
    ..RetrievalConfig::default()
  }
}

pub fn retrieval_service(config: RetrievalConfig) -> (RetrievalService, EmbedderProbe) {
  let probe = EmbedderProbe::default();
  let store = IndexStore::new(&config.index_path, &config.metadata_path);
  let handle = probe.clone();
  let service = RetrievalService::new(config, store, move || {
    handle.loads.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(KeywordEmbedder { probe: handle.clone() }) as Box<dyn TextEmbedder>)
  });
  (service, probe)
}

pub fn write_reports_csv(dir: &Path, rows: &[(&str, &str)]) -> PathBuf {
  let path = dir.join("indiana_reports.csv");
  let mut writer = csv::Writer::from_path(&path).unwrap();
  writer.write_record(["uid", "findings", "impression"]).unwrap();
  for (i, &(findings, impression)) in rows.iter().enumerate() {
    writer.write_record([i.to_string().as_str(), findings, impression]).unwrap();
  }
  writer.flush().unwrap();
  path
}

pub fn sample_reports() -> Vec<(&'static str, &'static str)> {
  vec![
    ("The heart is enlarged. Cardiomegaly.", "Cardiomegaly without edema."),
    ("Large left pleural effusion.", "Pleural effusion."),
    ("Lungs are clear bilaterally.", "No acute disease. Clear lung fields."),
    ("Small right apical pneumothorax.", "Pneumothorax."),
  ]
}

/// How a mock classifier behaves on each device
#[derive(Clone, Copy, PartialEq)]
pub enum Behaviour {
  Scores,
  OutOfMemory,
  Fail,
}

#[derive(Clone, Default)]
pub struct ClassifierProbe {
  pub loads: Arc<Mutex<Vec<Device>>>,
  pub releases: Arc<AtomicUsize>,
  pub inferences: Arc<AtomicUsize>,
}

impl ClassifierProbe {
  pub fn loads(&self) -> Vec<Device> {
    self.loads.lock().unwrap().clone()
  }

  pub fn releases(&self) -> usize {
    self.releases.load(Ordering::SeqCst)
  }
}

pub struct MockClassifier {
  scores: Vec<f32>,
  behaviour: Behaviour,
  probe: ClassifierProbe,
}

impl PathologyModel for MockClassifier {
  fn infer(&mut self, image: &Array4<f32>) -> Result<Vec<f32>> {
    self.probe.inferences.fetch_add(1, Ordering::SeqCst);
    assert_eq!(image.shape()[..2], [1, 1]);
    match self.behaviour {
      Behaviour::Scores => Ok(self.scores.clone()),
      Behaviour::OutOfMemory => Err(Error::runtime("classifier", "CUDA failure 2: out of memory")),
      Behaviour::Fail => Err(Error::model("classifier", "bad graph")),
    }
  }

  fn release_transient(&mut self) {
    self.probe.releases.fetch_add(1, Ordering::SeqCst);
  }
}

/// Loader producing mocks whose behaviour depends on the device
pub fn classifier_loader(
  scores: Vec<f32>,
  on_cuda: Behaviour,
  on_cpu: Behaviour,
  probe: ClassifierProbe,
) -> PathologyLoader {
  Arc::new(move |device: Device| {
    probe.loads.lock().unwrap().push(device);
    let behaviour = if device == Device::Cuda { on_cuda } else { on_cpu };
    Ok(Box::new(MockClassifier { scores: scores.clone(), behaviour, probe: probe.clone() }) as Box<dyn PathologyModel>)
  })
}

pub fn vision_config(labels: &[&str]) -> VisionConfig {
  VisionConfig {
    labels: labels.iter().map(|label| label.to_string()).collect(),
    resolution: 32,
    ..VisionConfig::default()
  }
}

pub fn classifier(labels: &[&str], scores: Vec<f32>) -> (ClassifierService, ClassifierProbe) {
  let probe = ClassifierProbe::default();
  let loader = classifier_loader(scores, Behaviour::Scores, Behaviour::Scores, probe.clone());
  (ClassifierService::new(vision_config(labels), Device::Cpu, loader), probe)
}

/// A gradient radiograph stand-in
pub fn write_test_image(dir: &Path, name: &str) -> PathBuf {
  let path = dir.join(name);
  let image = GrayImage::from_fn(64, 64, |x, y| Luma([((x + y) * 2) as u8]));
  image.save(&path).unwrap();
  path
}

pub fn write_flat_image(dir: &Path, name: &str) -> PathBuf {
  let path = dir.join(name);
  GrayImage::from_pixel(16, 16, Luma([128])).save(&path).unwrap();
  path
}

#[derive(Clone, Default)]
pub struct GeneratorProbe {
  pub loads: Arc<AtomicUsize>,
  pub releases: Arc<AtomicUsize>,
  pub prompts: Arc<Mutex<Vec<String>>>,
  pub params: Arc<Mutex<Vec<SamplingParams>>>,
}

impl GeneratorProbe {
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  pub fn releases(&self) -> usize {
    self.releases.load(Ordering::SeqCst)
  }

  pub fn prompts(&self) -> Vec<String> {
    self.prompts.lock().unwrap().clone()
  }

  pub fn last_params(&self) -> Option<SamplingParams> {
    self.params.lock().unwrap().last().copied()
  }
}

/// Echoes the prompt followed by a scripted continuation
pub struct ScriptedGenerator {
  continuation: std::result::Result<String, fn() -> Error>,
  probe: GeneratorProbe,
}

impl TextGenerator for ScriptedGenerator {
  fn generate(&mut self, prompt: &str, params: &SamplingParams) -> Result<String> {
    self.probe.prompts.lock().unwrap().push(prompt.to_string());
    self.probe.params.lock().unwrap().push(*params);
    match &self.continuation {
      Ok(text) => Ok(format!("{prompt}{text}")),
      Err(make_error) => Err(make_error()),
    }
  }

  fn release_transient(&mut self) {
    self.probe.releases.fetch_add(1, Ordering::SeqCst);
  }
}

pub fn narrative_service(continuation: &str) -> (NarrativeService, GeneratorProbe) {
  narrative_with(Ok(continuation.to_string()))
}

pub fn failing_narrative_service(make_error: fn() -> Error) -> (NarrativeService, GeneratorProbe) {
  narrative_with(Err(make_error))
}

fn narrative_with(continuation: std::result::Result<String, fn() -> Error>) -> (NarrativeService, GeneratorProbe) {
  let probe = GeneratorProbe::default();
  let handle = probe.clone();
  let service = NarrativeService::new(NarrativeConfig::default(), move || {
    handle.loads.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(ScriptedGenerator { continuation: continuation.clone(), probe: handle.clone() }) as Box<dyn TextGenerator>)
  });
  (service, probe)
}

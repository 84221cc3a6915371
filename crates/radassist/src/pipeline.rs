use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::narrative::{ChatMessage, NarrativeService};
use crate::retrieval::{RetrievalResult, RetrievalService};
use crate::vision::{ClassifierService, Prediction};
use crate::Result;

/// Search text used when the classifier finds nothing
pub const NO_FINDINGS_QUERY: &str = "no acute cardiopulmonary abnormality";

/// Everything produced for one radiograph
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
  pub image: PathBuf,
  pub prediction: Prediction,
  pub similar_cases: Vec<RetrievalResult>,
  pub report: String,
  pub generated_at: DateTime<Utc>,
}

/// Classifier, retrieval and narrative services wired together
pub struct Pipeline {
  classifier: ClassifierService,
  retrieval: RetrievalService,
  narrative: NarrativeService,
}

impl Pipeline {
  pub fn new(classifier: ClassifierService, retrieval: RetrievalService, narrative: NarrativeService) -> Self {
    Self { classifier, retrieval, narrative }
  }

  /// All three services backed by the ONNX models named in `config`
  #[cfg(feature = "onnx")]
  pub fn from_config(config: &crate::config::Config) -> Self {
    let device = config.device.resolve();
    bentley::verbose!("using device {device}");
    Self::new(
      ClassifierService::from_config(config.vision.clone(), device),
      RetrievalService::from_config(config, device),
      NarrativeService::from_config(config.narrative.clone(), device),
    )
  }

  /// Classify, find similar historical cases and write the report
  pub fn run(&mut self, image: &Path) -> Result<CaseReport> {
    bentley::event_info!("analyzing {}", image.display());

    let prediction = self.classifier.predict(image)?;
    let query = search_query(&prediction);
    bentley::verbose!("searching similar cases for: {query}");

    let similar_cases = self.retrieval.retrieve(&query, None)?;
    let context = format_context(&similar_cases);
    let report = self.narrative.generate_report(&prediction.findings, &context)?;

    bentley::success!("report ready for {}", image.display());
    Ok(CaseReport { image: image.to_path_buf(), prediction, similar_cases, report, generated_at: Utc::now() })
  }

  pub fn chat(&self, history: &[ChatMessage], user_input: &str, case_context: Option<&str>) -> Result<String> {
    self.narrative.chat(history, user_input, case_context)
  }
}

/// Finding names joined by `", "`, or a normal-study query when there are none
pub fn search_query(prediction: &Prediction) -> String {
  if prediction.has_findings() {
    prediction.finding_names().join(", ")
  } else {
    NO_FINDINGS_QUERY.to_string()
  }
}

/// Render retrieved reports as ranked case blocks for the report prompt
pub fn format_context(results: &[RetrievalResult]) -> String {
  if results.is_empty() {
    return "No similar historical cases available.".to_string();
  }
  results
    .iter()
    .map(|r| format!("Case {} (similarity {:.3}):\n{}", r.rank, r.similarity, r.report))
    .collect::<Vec<_>>()
    .join("\n\n")
}

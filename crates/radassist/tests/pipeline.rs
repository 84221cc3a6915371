mod common;

use radassist::pipeline::{Pipeline, NO_FINDINGS_QUERY};
use radassist::retrieval::CsvReportSource;
use radassist::Result;
use tempfile::TempDir;

use common::{
  classifier, narrative_service, retrieval_config, retrieval_service, sample_reports, write_reports_csv,
  write_test_image, GeneratorProbe, EmbedderProbe,
};

const LABELS: [&str; 3] = ["Cardiomegaly", "Edema", "Effusion"];

fn pipeline(temp: &TempDir, scores: Vec<f32>) -> Result<(Pipeline, EmbedderProbe, GeneratorProbe)> {
  let config = retrieval_config(temp.path());
  let csv = write_reports_csv(temp.path(), &sample_reports());
  let (mut retrieval, embedder) = retrieval_service(config.clone());
  retrieval.ingest(&CsvReportSource::new(csv, config.fields.clone()))?;

  let (classifier, _) = classifier(&LABELS, scores);
  let (narrative, generator) = narrative_service("\nFINDINGS: Enlarged heart.\nIMPRESSION: Cardiomegaly.");
  Ok((Pipeline::new(classifier, retrieval, narrative), embedder, generator))
}

#[test]
fn test_run_produces_a_complete_case_report() -> Result<()> {
  let temp = TempDir::new()?;
  let image = write_test_image(temp.path(), "case.png");
  let (mut pipeline, embedder, generator) = pipeline(&temp, vec![0.88, 0.61, 0.1])?;

  let case = pipeline.run(&image)?;

  assert_eq!(case.image, image);
  assert_eq!(case.prediction.finding_names(), vec!["Cardiomegaly", "Edema"]);
  assert_eq!(embedder.last_text().as_deref(), Some("Cardiomegaly, Edema"));
  assert_eq!(case.similar_cases.len(), 3);
  assert_eq!(case.similar_cases[0].metadata.row, 0);
  assert_eq!(case.report, "FINDINGS: Enlarged heart.\nIMPRESSION: Cardiomegaly.");

  let prompt = &generator.prompts()[0];
  assert!(prompt.contains("Cardiomegaly (0.88), Edema (0.61)"));
  assert!(prompt.contains("Case 1 (similarity"));
  assert!(prompt.contains("Findings: The heart is enlarged."));
  Ok(())
}

#[test]
fn test_run_without_findings_searches_for_normal_studies() -> Result<()> {
  let temp = TempDir::new()?;
  let image = write_test_image(temp.path(), "normal.png");
  let (mut pipeline, embedder, _) = pipeline(&temp, vec![0.1, 0.2, 0.05])?;

  let case = pipeline.run(&image)?;

  assert!(!case.prediction.has_findings());
  assert_eq!(embedder.last_text().as_deref(), Some(NO_FINDINGS_QUERY));
  assert!(!case.report.is_empty());
  Ok(())
}

#[test]
fn test_invalid_image_stops_before_retrieval() -> Result<()> {
  let temp = TempDir::new()?;
  let (mut pipeline, embedder, generator) = pipeline(&temp, vec![0.9, 0.9, 0.9])?;
  let calls_after_ingest = embedder.calls();

  let err = pipeline.run(&temp.path().join("nope.png")).unwrap_err();

  assert!(err.is_input_error());
  assert_eq!(embedder.calls(), calls_after_ingest);
  assert_eq!(generator.loads(), 0);
  Ok(())
}

#[test]
fn test_case_report_serializes_to_json() -> Result<()> {
  let temp = TempDir::new()?;
  let image = write_test_image(temp.path(), "case.png");
  let (mut pipeline, _, _) = pipeline(&temp, vec![0.88, 0.61, 0.1])?;

  let case = pipeline.run(&image)?;
  let json = serde_json::to_value(&case).unwrap();

  assert_eq!(json["prediction"]["detected_count"], 2);
  assert_eq!(json["prediction"]["pathologies"][0]["name"], "Cardiomegaly");
  assert_eq!(json["similar_cases"][0]["rank"], 1);
  assert!(json["generated_at"].is_string());
  Ok(())
}

#[test]
fn test_chat_forwards_to_the_narrative_service() -> Result<()> {
  let temp = TempDir::new()?;
  let (pipeline, _, generator) = pipeline(&temp, vec![0.1, 0.1, 0.1])?;

  let reply = pipeline.chat(&[], "What is cardiomegaly?", Some("Cardiomegaly (0.88)"))?;

  assert!(!reply.is_empty());
  assert!(generator.prompts()[0].contains("**Current Case:**\nCardiomegaly (0.88)"));
  Ok(())
}

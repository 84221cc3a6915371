use anyhow::{anyhow, Context, Result};
use colored::*;
use std::path::{Path, PathBuf};

use super::display;
use crate::config::Config;
use crate::narrative::{ChatMessage, NarrativeService};
use crate::pipeline::Pipeline;
use crate::retrieval::{self, find_reports_file, CsvReportSource, RetrievalService};
use crate::vision::ClassifierService;

/// Classify a radiograph and list its findings
pub fn predict(config: &Config, image: &Path, json: bool) -> Result<()> {
  let classifier = ClassifierService::from_config(config.vision.clone(), config.device.resolve());
  let prediction = classifier.predict(image)?;

  if json {
    println!("{}", serde_json::to_string_pretty(&prediction)?);
  } else {
    display::display_prediction(&prediction);
  }
  Ok(())
}

/// Build the report index from a CSV file or a dataset directory
pub fn ingest(config: &Config, csv: Option<&Path>, dataset_dir: Option<&Path>) -> Result<()> {
  let fields = config.retrieval.fields.clone();
  let source = match (csv, dataset_dir) {
    (Some(path), _) => CsvReportSource::new(path, fields),
    (None, Some(dir)) => CsvReportSource::new(find_reports_file(dir, &fields)?, fields),
    (None, None) => retrieval::default_source(&config.retrieval)
      .context("pass a reports CSV or --dataset-dir, or set retrieval.reports_csv")?,
  };

  let mut service = RetrievalService::from_config(config, config.device.resolve());
  let count = service.ingest(&source)?;

  println!(
    "{} Indexed {} reports into {}",
    "✓".green(),
    count.to_string().yellow(),
    service.store().index_path().display().to_string().cyan()
  );
  Ok(())
}

/// Show the historical reports most similar to the search terms
pub fn search(config: &Config, terms: &[String], top_k: Option<usize>) -> Result<()> {
  let query = terms.join(" ");
  let mut service = RetrievalService::from_config(config, config.device.resolve());
  let results = service.retrieve(&query, top_k)?;

  display::display_similar_cases(&results);
  Ok(())
}

/// Run the full pipeline on a radiograph
pub fn report(config: &Config, image: &Path, json: bool) -> Result<()> {
  let mut pipeline = Pipeline::from_config(config);
  let case = pipeline.run(image)?;

  if json {
    println!("{}", serde_json::to_string_pretty(&case)?);
  } else {
    display::display_case_report(&case);
  }
  Ok(())
}

/// Answer a question, continuing the conversation kept in `history_file`
pub fn chat(config: &Config, message: &str, history_file: Option<&Path>, context: Option<&str>) -> Result<()> {
  let mut history = match history_file {
    Some(path) => load_history(path)?,
    None => Vec::new(),
  };

  let narrative = NarrativeService::from_config(config.narrative.clone(), config.device.resolve());
  let reply = narrative.chat(&history, message, context)?;
  println!("{reply}");

  if let Some(path) = history_file {
    history.push(ChatMessage::new("user", message));
    history.push(ChatMessage::new("assistant", reply));
    save_history(path, &history)?;
  }
  Ok(())
}

/// Read a JSON conversation; a missing file is an empty conversation
pub fn load_history(path: &Path) -> Result<Vec<ChatMessage>> {
  if !path.exists() {
    return Ok(Vec::new());
  }
  let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&content).map_err(|e| anyhow!("invalid chat history {}: {e}", path.display()))
}

pub fn save_history(path: &Path, history: &[ChatMessage]) -> Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(path, serde_json::to_string_pretty(history)?)
    .with_context(|| format!("writing {}", path.display()))
}

/// Resolve the config file the CLI was pointed at, if any
pub fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
  Ok(Config::load(explicit.as_deref())?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_history_round_trips_through_a_file() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("chats/case.json");

    assert!(load_history(&path)?.is_empty());

    let history = vec![ChatMessage::new("user", "Is it serious?"), ChatMessage::new("assistant", "Mildly.")];
    save_history(&path, &history)?;
    assert_eq!(load_history(&path)?, history);
    Ok(())
  }

  #[test]
  fn test_history_without_roles_still_parses() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("history.json");
    std::fs::write(&path, r#"[{"content": "hello"}]"#)?;

    let history = load_history(&path)?;
    assert_eq!(history[0].content, "hello");
    assert!(history[0].role.is_empty());
    Ok(())
  }
}

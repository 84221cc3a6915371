//! Display formatting utilities for CLI output

use colored::*;

use crate::pipeline::CaseReport;
use crate::retrieval::RetrievalResult;
use crate::vision::Prediction;

const WRAP_WIDTH: usize = 80;

/// Wrap text to fit within a specified width
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
  let mut lines = Vec::new();

  for paragraph in text.split('\n') {
    if paragraph.trim().is_empty() {
      lines.push(String::new());
      continue;
    }

    let mut current_line = String::new();
    for word in paragraph.split_whitespace() {
      if current_line.is_empty() {
        current_line = word.to_string();
      } else if current_line.len() + 1 + word.len() <= width {
        current_line.push(' ');
        current_line.push_str(word);
      } else {
        lines.push(current_line);
        current_line = word.to_string();
      }
    }

    if !current_line.is_empty() {
      lines.push(current_line);
    }
  }

  lines
}

fn print_wrapped(text: &str) {
  for line in wrap_text(text, WRAP_WIDTH) {
    println!("{line}");
  }
}

/// Colour a confidence by how strongly it indicates a finding
pub fn format_confidence(confidence: f32) -> ColoredString {
  let text = format!("{confidence:.3}");
  if confidence >= 0.8 {
    text.red().bold()
  } else if confidence >= 0.5 {
    text.yellow()
  } else {
    text.dimmed()
  }
}

pub fn display_prediction(prediction: &Prediction) {
  println!("{}", "=== Findings ===".blue().bold());

  if !prediction.has_findings() {
    println!("No findings above threshold.");
  }
  for finding in &prediction.findings {
    println!("  {} {}", format_confidence(finding.confidence), finding.pathology.bold());
  }
  println!();
}

pub fn display_similar_cases(results: &[RetrievalResult]) {
  if results.is_empty() {
    println!("No similar reports found.");
    return;
  }

  for result in results {
    println!(
      "=== Case {} (similarity {}) ===",
      result.rank.to_string().yellow().bold(),
      format!("{:.3}", result.similarity).cyan()
    );
    print_wrapped(&result.report);
    println!();
  }
}

pub fn display_case_report(case: &CaseReport) {
  display_prediction(&case.prediction);

  println!("{}", "=== Similar Cases ===".blue().bold());
  display_similar_cases(&case.similar_cases);

  println!("{}", "=== Report ===".blue().bold());
  print_wrapped(&case.report);
  println!();
  println!("{}", format!("generated {}", case.generated_at.format("%Y-%m-%d %H:%M:%S UTC")).dimmed());
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wrap_text_breaks_on_word_boundaries() {
    let lines = wrap_text("Heart size is mildly enlarged", 12);
    assert_eq!(lines, vec!["Heart size", "is mildly", "enlarged"]);
  }

  #[test]
  fn test_wrap_text_keeps_blank_lines_between_paragraphs() {
    let lines = wrap_text("FINDINGS: clear\n\nIMPRESSION: normal", 80);
    assert_eq!(lines, vec!["FINDINGS: clear", "", "IMPRESSION: normal"]);
  }
}

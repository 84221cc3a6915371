//! Prompt templates and continuation extraction

use serde::{Deserialize, Serialize};

use crate::vision::Finding;

/// Marks where the model's report begins
pub const REPORT_MARKER: &str = "**REPORT:**";

const CHAT_SYSTEM_PROMPT: &str = "You are a medical AI assistant helping doctors understand radiology reports. \nAnswer questions clearly and professionally. Base your responses on medical knowledge and the current case.";

/// A previous turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  #[serde(default)]
  pub role: String,
  pub content: String,
}

impl ChatMessage {
  pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
    Self { role: role.into(), content: content.into() }
  }
}

/// `"name (0.85)"` pairs joined by `", "`
pub fn format_findings(findings: &[Finding]) -> String {
  findings
    .iter()
    .map(|f| format!("{} ({:.2})", f.pathology, f.confidence))
    .collect::<Vec<_>>()
    .join(", ")
}

pub fn report_prompt(findings: &[Finding], context: &str) -> String {
  format!(
    "You are an expert radiologist writing a professional chest X-ray report.

**Detected Findings:**
{findings}

**Similar Historical Cases:**
{context}

**Task:** Generate a structured radiology report with the following sections:

1. FINDINGS: Describe the observed pathologies in detail
2. IMPRESSION: Provide clinical interpretation
3. RECOMMENDATIONS: Suggest follow-up actions if needed

Write in professional medical language. Be concise but thorough.

{REPORT_MARKER}
",
    findings = format_findings(findings),
  )
}

/// Chat prompt folding in the last `window` history messages.
///
/// Message contents are included without role labels.
pub fn chat_prompt(history: &[ChatMessage], user_input: &str, case_context: Option<&str>, window: usize) -> String {
  let mut prompt = CHAT_SYSTEM_PROMPT.to_string();

  if let Some(context) = case_context.filter(|c| !c.is_empty()) {
    prompt.push_str(&format!("\n\n**Current Case:**\n{context}"));
  }
  prompt.push_str("\n\n");

  for message in recent(history, window) {
    prompt.push_str(&message.content);
    prompt.push_str("\n\n");
  }

  prompt.push_str(user_input);
  prompt.push_str("\n\nAssistant:");
  prompt
}

/// The last `window` messages
pub fn recent(history: &[ChatMessage], window: usize) -> &[ChatMessage] {
  &history[history.len().saturating_sub(window)..]
}

/// Text after the first report marker, up to a repeated marker; the plain
/// continuation when the marker is missing
pub fn extract_report(generated: &str, prompt: &str) -> String {
  match generated.split(REPORT_MARKER).nth(1) {
    Some(report) => report.trim().to_string(),
    None => extract_continuation(generated, prompt),
  }
}

/// Whatever follows the prompt in `generated`, trimmed
pub fn extract_continuation(generated: &str, prompt: &str) -> String {
  let continuation = generated
    .strip_prefix(prompt)
    .unwrap_or_else(|| generated.get(prompt.len()..).unwrap_or_default());
  continuation.trim().to_string()
}

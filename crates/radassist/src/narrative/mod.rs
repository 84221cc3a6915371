//! Report writing and follow-up conversation over a causal language model

pub mod prompt;
pub mod sampling;
#[cfg(feature = "onnx")]
pub mod onnx;

use crate::config::NarrativeConfig;
use crate::runtime::LazyModel;
use crate::vision::Finding;
use crate::Result;

pub use prompt::ChatMessage;
pub use sampling::SamplingParams;

pub const MODEL_NAME: &str = "generator";

/// Chat replies use a fixed, shorter budget than reports
pub const CHAT_SAMPLING: SamplingParams = SamplingParams { max_new_tokens: 256, temperature: 0.7, top_p: 0.9 };

/// A text generation model
pub trait TextGenerator: Send {
  /// Generate a continuation of `prompt`, returning the prompt followed by
  /// the generated text
  fn generate(&mut self, prompt: &str, params: &SamplingParams) -> Result<String>;

  /// Drop per-request state such as the attention cache
  fn release_transient(&mut self) {}
}

pub struct NarrativeService {
  config: NarrativeConfig,
  model: LazyModel<Box<dyn TextGenerator>>,
}

impl NarrativeService {
  /// Service whose generator is built by `loader` on first use
  pub fn new(
    config: NarrativeConfig,
    loader: impl Fn() -> Result<Box<dyn TextGenerator>> + Send + Sync + 'static,
  ) -> Self {
    Self { config, model: LazyModel::new(MODEL_NAME, loader) }
  }

  /// Service backed by the ONNX causal LM named in `config`
  #[cfg(feature = "onnx")]
  pub fn from_config(config: NarrativeConfig, device: crate::runtime::Device) -> Self {
    let location = config.generator.clone();
    let seed = config.seed;
    Self::new(config, move || {
      let model = onnx::OnnxCausalLm::load(&location, device, seed)?;
      Ok(Box::new(model) as Box<dyn TextGenerator>)
    })
  }

  fn report_sampling(&self) -> SamplingParams {
    SamplingParams {
      max_new_tokens: self.config.max_new_tokens,
      temperature: self.config.temperature,
      top_p: self.config.top_p,
    }
  }

  /// Write a structured report for `findings`, informed by similar cases
  pub fn generate_report(&self, findings: &[Finding], context: &str) -> Result<String> {
    let prompt = prompt::report_prompt(findings, context);
    bentley::info!("generating report...");

    let generated = self
      .run(&prompt, &self.report_sampling())
      .inspect_err(|e| bentley::error!("report generation failed: {e}"))?;
    Ok(prompt::extract_report(&generated, &prompt))
  }

  /// Answer `user_input` given the recent conversation and the current case
  pub fn chat(&self, history: &[ChatMessage], user_input: &str, case_context: Option<&str>) -> Result<String> {
    let prompt = prompt::chat_prompt(history, user_input, case_context, self.config.history_window);
    bentley::info!("generating chat response...");

    let generated = self
      .run(&prompt, &CHAT_SAMPLING)
      .inspect_err(|e| bentley::error!("chat failed: {e}"))?;
    Ok(prompt::extract_continuation(&generated, &prompt))
  }

  fn run(&self, prompt: &str, params: &SamplingParams) -> Result<String> {
    self.model.with(|generator| {
      let result = generator.generate(prompt, params);
      generator.release_transient();
      result
    })
  }
}

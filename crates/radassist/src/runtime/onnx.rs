//! ONNX Runtime session helpers shared by the model backends

use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch},
  session::{builder::GraphOptimizationLevel, RunOptions, Session},
};
use std::path::Path;

use super::Device;
use crate::{Error, Result};

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
  let mut providers = Vec::new();

  if device.is_accelerator() {
    providers.push(CUDAExecutionProvider::default().build().error_on_failure());
  }

  providers.push(CPUExecutionProvider::default().build());
  providers
}

/// Create a session for `model_path` on `device`
pub fn build_session(model: &'static str, model_path: &Path, device: Device) -> Result<Session> {
  bentley::verbose!("creating {model} session on {device} from {}", model_path.display());

  Session::builder()
    .map_err(|e| Error::runtime(model, e))?
    .with_optimization_level(GraphOptimizationLevel::Level3)
    .map_err(|e| Error::runtime(model, e))?
    .with_execution_providers(execution_providers(device))
    .map_err(|e| Error::runtime(model, e))?
    .commit_from_file(model_path)
    .map_err(|e| Error::runtime(model, e))
}

/// Run options that hand the CUDA arena's unused memory back after each run
pub fn run_options(model: &'static str, device: Device) -> Result<RunOptions> {
  let mut options = RunOptions::new().map_err(|e| Error::runtime(model, e))?;
  if device.is_accelerator() {
    options
      .add_config_entry("memory.enable_memory_arena_shrinkage", "gpu:0")
      .map_err(|e| Error::runtime(model, e))?;
  }
  Ok(options)
}

pub fn input_names(session: &Session) -> Vec<String> {
  session.inputs.iter().map(|input| input.name.to_string()).collect()
}

pub fn output_names(session: &Session) -> Vec<String> {
  session.outputs.iter().map(|output| output.name.to_string()).collect()
}

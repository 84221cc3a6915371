//! Command-line front end

#[cfg(feature = "onnx")]
pub mod commands;
pub mod display;

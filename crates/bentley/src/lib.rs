//! ## Features
//!
//! - Standard logging levels (verbose, debug, info, warn, error, success)
//! - Multi-line message support with consistent prefixes
//! - Timestamped event logging
//! - Optional structured output through `tracing` (set `RADASSIST_LOG`)
//! - All output to stderr, so stdout stays clean for command results
//!
//! ## Usage
//!
//! Call [`init`] once at startup, then log with the functions or with the
//! `bentley::info!("loaded {} records", n)` family of macros.

use chrono::Local;
use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Environment variable that switches output to structured `tracing` events
pub const LOG_ENV: &str = "RADASSIST_LOG";

const TRACING_TARGET: &str = "radassist";

static VERBOSE: AtomicBool = AtomicBool::new(false);
static STRUCTURED: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
  Verbose,
  Debug,
  Info,
  Warn,
  Error,
  Success,
}

impl Level {
  fn prefix(self) -> String {
    let (color, tag) = match self {
      Level::Verbose => (Color::Cyan, "verb"),
      Level::Debug => (Color::Magenta, "debug"),
      Level::Info => (Color::Blue, "info"),
      Level::Warn => (Color::Yellow, "warn"),
      Level::Error => (Color::Red, "error"),
      Level::Success => (Color::Green, "sccs"),
    };
    format_prefix(color, tag)
  }
}

/// Initialize logging.
///
/// `verbose` enables `verbose`/`debug` lines. When `RADASSIST_LOG` is set the
/// coloured renderer is replaced by a `tracing-subscriber` formatter filtered
/// by that variable (e.g. `RADASSIST_LOG=radassist=debug`).
pub fn init(verbose: bool) {
  set_verbose(verbose);

  let structured = std::env::var(LOG_ENV).is_ok();
  if structured {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .try_init()
      .is_ok();
    let _ = STRUCTURED.set(installed);
  } else {
    let _ = STRUCTURED.set(false);
  }
}

pub fn set_verbose(enabled: bool) {
  VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
  VERBOSE.load(Ordering::Relaxed)
}

fn structured() -> bool {
  STRUCTURED.get().copied().unwrap_or(false)
}

/// Core output function, one stderr line per message line
pub fn log(message: &str) {
  for line in message.lines() {
    eprintln!("{line}");
  }
}

/// Format a colored prefix for log messages
fn format_prefix(color: Color, prefix: &str) -> String {
  let pad = 7usize.saturating_sub(prefix.len() + 2);
  format!("[{}]{:<width$}", prefix.color(color).bold(), "", width = pad)
}

fn emit(level: Level, message: &str) {
  if matches!(level, Level::Verbose | Level::Debug) && !is_verbose() && !structured() {
    return;
  }

  if structured() {
    for line in message.lines() {
      match level {
        Level::Verbose => tracing::trace!(target: TRACING_TARGET, "{line}"),
        Level::Debug => tracing::debug!(target: TRACING_TARGET, "{line}"),
        Level::Info | Level::Success => tracing::info!(target: TRACING_TARGET, "{line}"),
        Level::Warn => tracing::warn!(target: TRACING_TARGET, "{line}"),
        Level::Error => tracing::error!(target: TRACING_TARGET, "{line}"),
      }
    }
    return;
  }

  let prefix = level.prefix();
  for line in message.lines() {
    log(&format!("{prefix} {line}"));
  }
}

/// Verbose logging - step-by-step detail, hidden unless verbose is enabled
pub fn verbose(message: &str) {
  emit(Level::Verbose, message);
}

/// Debug level logging - detailed diagnostic information
pub fn debug(message: &str) {
  emit(Level::Debug, message);
}

/// Info level logging - general information
pub fn info(message: &str) {
  emit(Level::Info, message);
}

/// Warning level logging - something needs attention
pub fn warn(message: &str) {
  emit(Level::Warn, message);
}

/// Error level logging - something went wrong
pub fn error(message: &str) {
  emit(Level::Error, message);
}

/// Success level logging - something completed successfully
pub fn success(message: &str) {
  emit(Level::Success, message);
}

/// Timestamped info event
pub fn event_info(message: &str) {
  if structured() {
    emit(Level::Info, message);
    return;
  }

  let timestamp = Local::now().format("%H:%M:%S").to_string();
  let prefix = format!("[{}] [{}]", "event".blue().bold(), timestamp.cyan());
  for line in message.lines() {
    log(&format!("{prefix} {line}"));
  }
}

#[macro_export]
macro_rules! info {
  ($($arg:tt)+) => {
    $crate::info(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! warn {
  ($($arg:tt)+) => {
    $crate::warn(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! error {
  ($($arg:tt)+) => {
    $crate::error(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! verbose {
  ($($arg:tt)+) => {
    $crate::verbose(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! debug {
  ($($arg:tt)+) => {
    $crate::debug(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! success {
  ($($arg:tt)+) => {
    $crate::success(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! event_info {
  ($($arg:tt)+) => {
    $crate::event_info(&format!($($arg)+)) // LCOV_EXCL_LINE
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prefix_pads_short_tags() {
    colored::control::set_override(false);
    assert_eq!(format_prefix(Color::Blue, "info"), "[info] ");
    assert_eq!(format_prefix(Color::Cyan, "verb"), "[verb] ");
    assert_eq!(format_prefix(Color::Red, "error"), "[error]");
    colored::control::unset_override();
  }
}

use bentley::*;
use serial_test::serial;

#[test]
#[serial]
fn test_basic_logging_functions() {
  // None of the levels should panic, verbose or not
  set_verbose(false);
  info("Test info message");
  warn("Test warning message");
  error("Test error message");
  debug("hidden debug message");
  verbose("hidden verbose message");
  success("Test success message");
}

#[test]
#[serial]
fn test_multiline_messages() {
  let multiline_msg = "First line\nSecond line\nThird line";
  set_verbose(true);
  info(multiline_msg);
  warn(multiline_msg);
  verbose(multiline_msg);
  event_info(multiline_msg);
  set_verbose(false);
}

#[test]
#[serial]
fn test_verbose_toggle() {
  set_verbose(true);
  assert!(is_verbose());
  set_verbose(false);
  assert!(!is_verbose());
}

#[test]
#[serial]
fn test_macros_accept_format_arguments() {
  let count = 3;
  bentley::info!("indexed {count} reports");
  bentley::warn!("{} of {} rows skipped", 1, count);
  bentley::verbose!("plain literal");
  bentley::debug!("shape {:?}", [1, 2]);
  bentley::success!("done");
}

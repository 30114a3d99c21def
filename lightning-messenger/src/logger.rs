// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Log traits and macros live here. The crate never writes to stdout or a
//! file itself; embedders provide a [`Logger`] and route records wherever
//! they like.

use core::fmt;

static LOG_LEVEL_NAMES: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// An enum representing the available verbosity levels of the logger.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub enum Level {
	/// Designates very low priority, often extremely verbose, information
	Trace,
	/// Designates lower priority information
	Debug,
	/// Designates useful information
	Info,
	/// Designates hazardous situations
	Warn,
	/// Designates very serious errors
	Error,
}

impl fmt::Display for Level {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		fmt.pad(LOG_LEVEL_NAMES[*self as usize])
	}
}

impl Level {
	/// Returns the most verbose logging level.
	#[inline]
	pub fn max() -> Level {
		Level::Trace
	}
}

/// A unit of logging output with metadata to enable filtering.
#[derive(Clone, Debug)]
pub struct Record<'a> {
	/// The verbosity level of the message.
	pub level: Level,
	/// The message body.
	pub args: fmt::Arguments<'a>,
	/// The module path of the message.
	pub module_path: &'static str,
	/// The source file containing the message.
	pub file: &'static str,
	/// The line containing the message.
	pub line: u32,
}

impl<'a> Record<'a> {
	/// Returns a new Record.
	#[inline]
	pub fn new(
		level: Level, args: fmt::Arguments<'a>, module_path: &'static str, file: &'static str,
		line: u32,
	) -> Record<'a> {
		Record { level, args, module_path, file, line }
	}
}

/// A trait encapsulating the operations required of a logger.
pub trait Logger {
	/// Logs the [`Record`].
	fn log(&self, record: &Record);
}

macro_rules! log_internal {
	($logger: expr, $lvl: expr, $($arg:tt)+) => (
		$logger.log(&$crate::logger::Record::new(
			$lvl, format_args!($($arg)+), module_path!(), file!(), line!(),
		))
	);
}

macro_rules! log_error {
	($logger: expr, $($arg:tt)*) => (
		log_internal!($logger, $crate::logger::Level::Error, $($arg)*)
	)
}

macro_rules! log_warn {
	($logger: expr, $($arg:tt)*) => (
		log_internal!($logger, $crate::logger::Level::Warn, $($arg)*)
	)
}

macro_rules! log_info {
	($logger: expr, $($arg:tt)*) => (
		log_internal!($logger, $crate::logger::Level::Info, $($arg)*)
	)
}

macro_rules! log_debug {
	($logger: expr, $($arg:tt)*) => (
		log_internal!($logger, $crate::logger::Level::Debug, $($arg)*)
	)
}

macro_rules! log_trace {
	($logger: expr, $($arg:tt)*) => (
		log_internal!($logger, $crate::logger::Level::Trace, $($arg)*)
	)
}

#[cfg(test)]
mod tests {
	use crate::logger::Level;
	use crate::logger::Logger;
	use crate::test_utils::TestLogger;

	#[test]
	fn test_level_show() {
		assert_eq!("INFO", Level::Info.to_string());
		assert_eq!("ERROR", Level::Error.to_string());
		assert_ne!("WARN", Level::Error.to_string());
	}

	#[test]
	fn test_log_ordering() {
		assert!(Level::Error > Level::Warn);
		assert!(Level::Warn > Level::Info);
		assert!(Level::Info > Level::Debug);
		assert!(Level::Debug > Level::Trace);
		assert_eq!(Level::max(), Level::Trace);
	}

	#[test]
	fn test_logging_macros() {
		let logger = TestLogger::new();
		log_error!(logger, "an error with arg {}", 42);
		log_warn!(logger, "a warning");
		log_info!(logger, "an info line");
		log_debug!(logger, "a debug line");
		log_trace!(logger, "a trace line");
		assert_eq!(logger.lines(), 5);
	}
}

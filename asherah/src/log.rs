//! Logging for the asherah library
//!
//! The library logs through the standard `log` facade. Hosts that want
//! library-scoped debug output without wiring a global `log` backend can
//! install a [`Logger`] here instead; by default nothing is installed and
//! logging through this module is a no-op.

use std::fmt;
use std::sync::RwLock;

/// Logger interface for the asherah library
pub trait Logger: Send + Sync {
    /// Log a debug message
    fn debug(&self, message: &str);

    /// Log a formatted debug message
    fn debugf(&self, args: fmt::Arguments<'_>);
}

/// A logger that writes to standard output
#[derive(Debug, Default)]
pub struct StdoutLogger;

impl StdoutLogger {
    /// Create a new stdout logger
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance
    pub fn boxed() -> Box<dyn Logger> {
        Box::new(Self::new())
    }
}

#[allow(clippy::print_stdout)]
impl Logger for StdoutLogger {
    fn debug(&self, message: &str) {
        println!("[DEBUG] {message}");
    }

    fn debugf(&self, args: fmt::Arguments<'_>) {
        println!("[DEBUG] {args}");
    }
}

static LOGGER: RwLock<Option<Box<dyn Logger>>> = RwLock::new(None);

/// Installs a logger for the asherah library
pub fn set_logger(logger: Box<dyn Logger>) {
    let mut global = LOGGER.write().unwrap_or_else(|e| e.into_inner());
    *global = Some(logger);
}

/// Removes any installed logger
pub fn clear_logger() {
    let mut global = LOGGER.write().unwrap_or_else(|e| e.into_inner());
    *global = None;
}

/// Returns true if a logger is installed
pub fn debug_enabled() -> bool {
    LOGGER
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .is_some()
}

/// Logs a debug message through the installed logger, if any
pub fn debug(message: &str) {
    if let Some(logger) = LOGGER.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
        logger.debug(message);
    }
}

/// Logs a formatted debug message through the installed logger, if any
pub fn debugf(args: fmt::Arguments<'_>) {
    if let Some(logger) = LOGGER.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
        logger.debugf(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLogger(Arc<AtomicUsize>);

    impl Logger for CountingLogger {
        fn debug(&self, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn debugf(&self, _args: fmt::Arguments<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn installed_logger_receives_messages() {
        let count = Arc::new(AtomicUsize::new(0));
        set_logger(Box::new(CountingLogger(Arc::clone(&count))));
        assert!(debug_enabled());

        debug("one");
        debugf(format_args!("two {}", 2));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        clear_logger();
        assert!(!debug_enabled());
        debug("dropped");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}

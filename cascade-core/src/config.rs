//! Scheduler configuration.
//!
//! Configuration is per thread, like the rest of the engine state.

use std::cell::Cell;

/// Default limit on nested transactions, reached only by feedback loops.
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// Tunables for the transaction scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of transactions on the stack at once. A transaction
    /// that would exceed it is dropped and reported as unhandled.
    pub max_depth: usize,

    /// Whether unhandled errors are logged through `tracing` by default.
    pub log_unhandled_errors: bool,
}

impl SchedulerConfig {
    /// Set the maximum transaction depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Enable or disable the default unhandled-error logger.
    pub fn with_unhandled_error_logging(mut self, enabled: bool) -> Self {
        self.log_unhandled_errors = enabled;
        self
    }

    /// Install this configuration for the current thread.
    pub fn install(self) {
        if self.log_unhandled_errors {
            crate::error::register_console_logger();
        } else {
            crate::error::unregister_console_logger();
        }
        CONFIG.with(|config| config.set(self));
    }

    /// The configuration active on the current thread.
    pub fn current() -> Self {
        CONFIG.with(Cell::get)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            log_unhandled_errors: true,
        }
    }
}

thread_local! {
    static CONFIG: Cell<SchedulerConfig> = Cell::new(SchedulerConfig {
        max_depth: DEFAULT_MAX_DEPTH,
        log_unhandled_errors: true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_install() {
        assert_eq!(SchedulerConfig::current(), SchedulerConfig::default());

        SchedulerConfig::default()
            .with_max_depth(0)
            .with_unhandled_error_logging(false)
            .install();
        let current = SchedulerConfig::current();
        assert_eq!(current.max_depth, 1);
        assert!(!current.log_unhandled_errors);

        SchedulerConfig::default().install();
    }
}

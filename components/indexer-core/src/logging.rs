//! Logging context threaded through every component, and the `try_*!`
//! macro family used to log through it without ever panicking when no
//! logger was configured (tests construct components with `Context::empty()`).

/// Holds the process logger (absent in tests) plus a tracing toggle that
/// call sites can use to gate especially chatty debug output.
#[derive(Clone, Debug)]
pub struct Context {
    pub logger: Option<slog::Logger>,
    pub tracer: bool,
}

impl Context {
    pub fn empty() -> Context {
        Context {
            logger: None,
            tracer: false,
        }
    }

    pub fn try_log<F: FnOnce(&slog::Logger)>(&self, f: F) {
        if let Some(ref logger) = self.logger {
            f(logger)
        }
    }

    pub fn expect_logger(&self) -> &slog::Logger {
        self.logger.as_ref().expect("context has no logger attached")
    }
}

#[macro_export]
macro_rules! try_info {
    ($a:expr, $tag:expr, $($args:tt)*) => {
        { $a.try_log(|l| slog::info!(l, $tag, $($args)*)); }
    };
    ($a:expr, $tag:expr) => {
        { $a.try_log(|l| slog::info!(l, $tag)); }
    };
}

#[macro_export]
macro_rules! try_debug {
    ($a:expr, $tag:expr, $($args:tt)*) => {
        { $a.try_log(|l| slog::debug!(l, $tag, $($args)*)); }
    };
    ($a:expr, $tag:expr) => {
        { $a.try_log(|l| slog::debug!(l, $tag)); }
    };
}

#[macro_export]
macro_rules! try_warn {
    ($a:expr, $tag:expr, $($args:tt)*) => {
        { $a.try_log(|l| slog::warn!(l, $tag, $($args)*)); }
    };
    ($a:expr, $tag:expr) => {
        { $a.try_log(|l| slog::warn!(l, $tag)); }
    };
}

#[macro_export]
macro_rules! try_error {
    ($a:expr, $tag:expr, $($args:tt)*) => {
        { $a.try_log(|l| slog::error!(l, $tag, $($args)*)); }
    };
    ($a:expr, $tag:expr) => {
        { $a.try_log(|l| slog::error!(l, $tag)); }
    };
}

#[macro_export]
macro_rules! try_crit {
    ($a:expr, $tag:expr, $($args:tt)*) => {
        { $a.try_log(|l| slog::crit!(l, $tag, $($args)*)); }
    };
    ($a:expr, $tag:expr) => {
        { $a.try_log(|l| slog::crit!(l, $tag)); }
    };
}

//! Unified Logging Macro for knx-discover
//!
//! This module provides a single logging entry point for the crate that
//! forwards to the `log` facade when the `log` feature is enabled (default)
//! and compiles away otherwise.
//!
//! # Usage
//!
//! ```rust,ignore
//! knx_log!(info, "Search started on {}", local);
//! knx_log!(debug, "Received {} bytes", n);
//! knx_log!(trace, "Discarding datagram from {}", from);
//! ```
//!
//! # Feature Flags
//!
//! - `log` - Uses the `log` crate (install any logger, e.g. `env_logger`)
//! - No feature - Arguments are type-checked but nothing is emitted

/// Unified logging macro - selects the `log` facade or a no-op based on features
#[cfg(feature = "log")]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { log::info!($($arg)*) };
    (debug, $($arg:tt)*) => { log::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { log::warn!($($arg)*) };
    (error, $($arg:tt)*) => { log::error!($($arg)*) };
    (trace, $($arg:tt)*) => { log::trace!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! knx_log {
    ($level:ident, $($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

//! Guest logging.
//!
//! Log lines emitted by scripts are kept on the [`ExecutionContext`] so the
//! dispatcher can show them, and mirrored to `tracing` tagged with the
//! tenant they came from.

use guildscript_core::{ExecutionContext, LogLevel};
use tracing::{debug, error, info, warn};

/// Longest guest log message kept, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Host implementation of the `log` binding.
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    ///
    /// Messages longer than [`MAX_MESSAGE_BYTES`] are truncated on a
    /// character boundary.
    pub fn log(ctx: &mut ExecutionContext, level: LogLevel, message: &str) {
        let message = truncate(message, MAX_MESSAGE_BYTES);

        let tenant = ctx.tenant_id().as_str();
        match level {
            LogLevel::Debug => debug!(tenant, guest_log = true, "{}", message),
            LogLevel::Info => info!(tenant, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(tenant, guest_log = true, "{}", message),
            LogLevel::Error => error!(tenant, guest_log = true, "{}", message),
        }

        ctx.log(level, message.to_string());
    }
}

fn truncate(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

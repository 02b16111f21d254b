//! Custom command dispatch.
//!
//! Turns an invocation request for a guild's custom command into a reply:
//! text commands are rendered, script commands are linked and run with the
//! guild's settings snapshot.

use serde::Deserialize;
use tracing::{info, warn};

use guildscript_common::InvocationContext;

use crate::response::{ApiError, CommandReply, LogLine};
use crate::settings::CommandKind;
use crate::state::AppState;

/// Body of an invoke request.
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    /// User issuing the command.
    pub issuer: String,

    /// Whitespace-split arguments after the command name.
    #[serde(default)]
    pub args: Vec<String>,

    /// Permission level of the issuer, computed by the caller.
    #[serde(default)]
    pub level: u32,
}

/// Run the custom command `name` in `guild`.
///
/// # Errors
///
/// - [`ApiError::NotFound`] if the guild has no such command
/// - [`ApiError::Script`] if the command's script fails, with detail
///   according to the request's level
pub async fn dispatch(
    state: &AppState,
    guild: &str,
    name: &str,
    request: InvokeRequest,
) -> Result<CommandReply, ApiError> {
    let settings = state.settings().get(guild).await?;
    let command = settings
        .commands
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("Command `{name}` does not exist")))?;

    match &command.kind {
        CommandKind::Text { text } => Ok(CommandReply::text(render_text(text, &request.issuer))),
        CommandKind::Script { url } => {
            let context = InvocationContext::new(guild, request.issuer)
                .with_settings(settings.snapshot())
                .with_args(request.args);

            let invocation = state.run_script(url, &context).await.map_err(|err| {
                warn!(guild, command = name, kind = %err.kind(), error = %err, "Command failed");
                ApiError::script(&err, request.level)
            })?;

            let duration_ms = u64::try_from(invocation.duration.as_millis()).unwrap_or(u64::MAX);
            info!(guild, command = name, duration_ms, "Command completed");

            Ok(CommandReply {
                text: None,
                value: invocation.value,
                logs: invocation.logs.iter().map(LogLine::from).collect(),
                duration_ms,
            })
        }
    }
}

/// Replace every `%user` with a mention of `issuer`.
pub fn render_text(text: &str, issuer: &str) -> String {
    text.replace("%user", &format!("<@{issuer}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_text() {
        assert_eq!(render_text("hi %user!", "42"), "hi <@42>!");
        assert_eq!(render_text("%user and %user", "7"), "<@7> and <@7>");
        assert_eq!(render_text("no mention", "7"), "no mention");
    }

    #[test]
    fn test_request_defaults() {
        let request: InvokeRequest = serde_json::from_str(r#"{"issuer": "u"}"#).unwrap();
        assert!(request.args.is_empty());
        assert_eq!(request.level, 0);
    }
}

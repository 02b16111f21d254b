//! HTTP replies and error conversion.
//!
//! Every failure leaves the server as a JSON body of the form
//! `{"error": {"kind": ..., "message": ...}}`. Script failures are shown in
//! full only to elevated invokers, see [`ApiError::script`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use guildscript_common::{ErrorKind, ScriptError};
use guildscript_core::LogEntry;

use crate::settings::SettingsError;

/// Lowest invoker level that sees full script diagnostics.
pub const DIAGNOSTIC_LEVEL: u32 = 2;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A script failed to load, link or run.
    #[error("{message}")]
    Script { kind: ErrorKind, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl ApiError {
    /// Convert a script error, exposing detail according to `level`.
    ///
    /// Invokers below [`DIAGNOSTIC_LEVEL`] only learn the error's kind.
    pub fn script(err: &ScriptError, level: u32) -> Self {
        let kind = err.kind();
        let message = if level >= DIAGNOSTIC_LEVEL {
            err.diagnostic()
        } else {
            generic_message(kind).to_string()
        };
        Self::Script { kind, message }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Script { kind, .. } => script_status(*kind),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Settings(SettingsError::InvalidGuild(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Settings(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Script { kind, .. } => kind.as_str(),
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Settings(_) => "settings",
        }
    }
}

/// Admin callers are trusted with full diagnostics.
impl From<ScriptError> for ApiError {
    fn from(err: ScriptError) -> Self {
        Self::script(&err, u32::MAX)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "kind": self.kind_name(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

fn script_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Protocol => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Network => StatusCode::BAD_GATEWAY,
        ErrorKind::Compile | ErrorKind::CyclicDependency => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Runtime | ErrorKind::Storage | ErrorKind::Config => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn generic_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Protocol => "the command's script URL is not allowed",
        ErrorKind::Forbidden => "the command's script host is not allowed",
        ErrorKind::Network => "the command's script could not be fetched",
        ErrorKind::Compile | ErrorKind::CyclicDependency => "the command's script is invalid",
        ErrorKind::TimedOut => "the command took too long",
        ErrorKind::Runtime | ErrorKind::Storage | ErrorKind::Config => "an error occurred",
    }
}

/// Successful command reply.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandReply {
    /// Text to post back, for text commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Value returned by a script's entry point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,

    /// Lines the script logged.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogLine>,

    pub duration_ms: u64,
}

impl CommandReply {
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            value: None,
            logs: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// A guest log line as returned to clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogLine {
    pub level: String,
    pub message: String,
}

impl From<&LogEntry> for LogLine {
    fn from(entry: &LogEntry) -> Self {
        Self {
            level: entry.level.to_string(),
            message: entry.message.clone(),
        }
    }
}

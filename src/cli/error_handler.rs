use crate::messages::wire::WireProtocolError;
use std::fmt;

/// Unified error type for CLI operations with user-friendly messages
#[derive(Debug)]
pub enum CliError {
    /// Wire protocol error
    Wire(WireProtocolError),
    /// Input validation error
    InvalidInput {
        field: String,
        value: String,
        reason: String,
        suggestion: String,
    },
    /// Configuration error
    Configuration {
        setting: String,
        issue: String,
        suggestion: String,
    },
    /// User-friendly error with custom message
    UserError {
        message: String,
        suggestion: Option<String>,
    },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Wire(e) => write!(f, "{}", format_wire_error(e)),
            CliError::InvalidInput {
                field,
                value,
                reason,
                suggestion,
            } => {
                write!(
                    f,
                    "❌ Invalid {}: '{}'\n   Reason: {}\n   💡 Suggestion: {}",
                    field, value, reason, suggestion
                )
            }
            CliError::Configuration {
                setting,
                issue,
                suggestion,
            } => {
                write!(
                    f,
                    "⚙️  Configuration Error: {}\n   Issue: {}\n   💡 Suggestion: {}",
                    setting, issue, suggestion
                )
            }
            CliError::UserError {
                message,
                suggestion,
            } => {
                if let Some(suggestion) = suggestion {
                    write!(f, "❌ {}\n   💡 Suggestion: {}", message, suggestion)
                } else {
                    write!(f, "❌ {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<WireProtocolError> for CliError {
    fn from(err: WireProtocolError) -> Self {
        CliError::Wire(err)
    }
}

impl CliError {
    pub fn invalid_frame_kind(value: &str) -> Self {
        CliError::InvalidInput {
            field: "frame kind".to_string(),
            value: value.to_string(),
            reason: "not a known frame kind name or code".to_string(),
            suggestion: "Use one of: session-id, heartbeat-interval, close, ping, pong, data (or 1-6)"
                .to_string(),
        }
    }

    pub fn message_type_not_allowed(kind: &str) -> Self {
        CliError::InvalidInput {
            field: "message type".to_string(),
            value: kind.to_string(),
            reason: "only data frames carry a message type".to_string(),
            suggestion: "Drop --message-type or use --kind data".to_string(),
        }
    }

    pub fn config_unavailable(issue: impl Into<String>) -> Self {
        CliError::Configuration {
            setting: "config file".to_string(),
            issue: issue.into(),
            suggestion: "Run 'polysock config init' to create a default configuration".to_string(),
        }
    }
}

fn format_wire_error(err: &WireProtocolError) -> String {
    let suggestion = if err.is_incomplete() {
        "The input ends in the middle of a frame; check that it was not truncated"
    } else {
        "Frames look like ~<kind>~<length>~<payload>, data frames like ~6~<type>~<length>~<payload>"
    };
    format!("❌ Wire format error: {}\n   💡 Suggestion: {}", err, suggestion)
}

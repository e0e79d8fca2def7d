//! Result and error types for Scrollcast.

use std::fmt;
use thiserror::Error;

/// Result type for Scrollcast operations
pub type CastResult<T> = Result<T, CastError>;

/// Pipeline phase, used to report where a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Opening the encoder session
    Open,
    /// Hold before the action (or before scrolling)
    HoldBefore,
    /// Triggering the configured action
    Action,
    /// Hold after the action
    HoldAfter,
    /// Scroll choreography
    Choreography,
    /// Closing the session and assembling the artifact
    Assemble,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::HoldBefore => "hold-before",
            Self::Action => "action",
            Self::HoldAfter => "hold-after",
            Self::Choreography => "choreography",
            Self::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while recording or compressing
#[derive(Debug, Error)]
pub enum CastError {
    /// Raster capture failed or timed out
    #[error("Capture failed: {message}")]
    Capture {
        /// Error message
        message: String,
    },

    /// Raster bytes malformed or decode exceeded its budget
    #[error("Decode failed: {message}")]
    Decode {
        /// Error message
        message: String,
    },

    /// The view failed to report its extent or apply a scroll
    #[error("Scroll failed: {message}")]
    Scroll {
        /// Error message
        message: String,
    },

    /// The view could not perform a page action such as a click
    #[error("Action failed: {message}")]
    Action {
        /// Error message
        message: String,
    },

    /// Encoder session used outside its lifecycle
    #[error("Encoder state error: {message}")]
    EncoderState {
        /// Error message
        message: String,
    },

    /// Codec or I/O failure inside the encoder
    #[error("Encoding failed: {message}")]
    Encode {
        /// Error message
        message: String,
    },

    /// Post compression exhausted its retries or produced nothing
    #[error("Compression with profile {profile} failed after {attempts} attempt(s): {message}")]
    Compression {
        /// Profile name
        profile: String,
        /// Attempts made
        attempts: usize,
        /// Last error message
        message: String,
    },

    /// Configuration rejected by the core
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// A fatal error tagged with the phase it happened in
    #[error("Recording failed during {phase}: {source}")]
    Phase {
        /// Failing phase
        phase: Phase,
        /// Underlying error
        #[source]
        source: Box<CastError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CastError {
    /// Create a capture error
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a scroll error
    pub fn scroll(message: impl Into<String>) -> Self {
        Self::Scroll {
            message: message.into(),
        }
    }

    /// Create an action error
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    /// Create an encoder state error
    pub fn encoder_state(message: impl Into<String>) -> Self {
        Self::EncoderState {
            message: message.into(),
        }
    }

    /// Create an encoding error
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Tag this error with the phase it happened in
    #[must_use]
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            already @ Self::Phase { .. } => already,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Phase this error was tagged with, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether this error terminates a recording run
    ///
    /// Compression failures are isolated per profile and never abort the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Compression { .. } => false,
            Self::Phase { source, .. } => source.is_fatal(),
            _ => true,
        }
    }
}

//! Pipeline errors.

use core::fmt;

use crate::config::ConfigError;
use crate::handshake::HandshakeError;
use crate::pool::PoolError;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// Source engine: bulk store → scratch slot.
    Source,
    /// Sink engine: scratch slot → sink device.
    Sink,
    /// Compose stage reading source images.
    ComposeRead,
    /// Compose stage writing an active frame buffer.
    ComposeWrite,
    /// Top-level orchestrator.
    Main,
}

impl Stage {
    /// Short lowercase name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Sink => "sink",
            Self::ComposeRead => "compose-read",
            Self::ComposeWrite => "compose-write",
            Self::Main => "main",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can stop a frame.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineError {
    /// A bus transaction failed.
    #[error("{stage} transaction failed at fragment {fragment}")]
    Transfer {
        /// Failing stage.
        stage: Stage,
        /// Fragment index within the frame.
        fragment: u16,
    },
    /// A wait exceeded the configured timeout.
    #[error("{stage} timed out waiting at fragment {fragment}")]
    Timeout {
        /// Waiting stage.
        stage: Stage,
        /// Fragment index within the frame.
        fragment: u16,
    },
    /// The peer engine aborted the frame.
    #[error("{stage} stopped at fragment {fragment}: frame aborted")]
    Aborted {
        /// Stage that observed the abort.
        stage: Stage,
        /// Fragment index within the frame.
        fragment: u16,
    },
    /// Buffer pool protocol violation.
    #[error("buffer pool: {0}")]
    Pool(PoolError),
    /// Invalid configuration.
    #[error("configuration: {0}")]
    Config(ConfigError),
    /// The orchestrator saw no event within the timeout.
    #[error("pipeline stalled")]
    Stalled,
}

impl PipelineError {
    /// Attach stage and fragment to a handshake failure.
    pub const fn from_handshake(err: HandshakeError, stage: Stage, fragment: u16) -> Self {
        match err {
            HandshakeError::Timeout => Self::Timeout { stage, fragment },
            HandshakeError::Aborted => Self::Aborted { stage, fragment },
            HandshakeError::NoSuchSlot(slot) => Self::Pool(PoolError::NoSuchSlot { slot }),
        }
    }

    /// True if this error only reports that the other side gave up first.
    pub const fn is_secondary(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

impl From<PoolError> for PipelineError {
    fn from(err: PoolError) -> Self {
        Self::Pool(err)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_errors_carry_stage_and_fragment() {
        assert_eq!(
            PipelineError::from_handshake(HandshakeError::Timeout, Stage::Sink, 7),
            PipelineError::Timeout {
                stage: Stage::Sink,
                fragment: 7
            }
        );
        assert!(PipelineError::from_handshake(HandshakeError::Aborted, Stage::Source, 0)
            .is_secondary());
    }

    #[test]
    fn messages_name_the_stage() {
        let e = PipelineError::Transfer {
            stage: Stage::ComposeWrite,
            fragment: 3,
        };
        assert_eq!(
            std::format!("{e}"),
            "compose-write transaction failed at fragment 3"
        );
    }
}

use crate::outcome::Outcome;

use std::io;

use thiserror::Error;

/// A failure that prevented the judged program from running to a classified end.
///
/// Messages never repeat their cause; `{:#}` on an `anyhow::Error` appends it.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("{name} is not set: expected {meaning}")]
    MissingVar {
        name: &'static str,
        meaning: &'static str,
    },

    #[error("{name} = {value:?} is invalid: expected {meaning}")]
    InvalidVar {
        name: &'static str,
        value: String,
        meaning: &'static str,
    },

    #[error("no command given")]
    MissingCommand,

    #[error("failed to drop privileges: {op}")]
    Privilege {
        op: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("failed to apply resource limits")]
    Limits(#[source] io::Error),

    #[error("failed to execute {bin}")]
    Exec {
        bin: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to {op}")]
    System {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    pub(crate) fn system(op: &'static str, source: impl Into<io::Error>) -> Self {
        LaunchError::System {
            op,
            source: source.into(),
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            LaunchError::MissingVar { .. }
            | LaunchError::InvalidVar { .. }
            | LaunchError::MissingCommand
            | LaunchError::Privilege { .. } => Outcome::ConfigurationError,
            LaunchError::Limits(_) | LaunchError::Exec { .. } | LaunchError::System { .. } => {
                Outcome::ExecError
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        1
    }
}

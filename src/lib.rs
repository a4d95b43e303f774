#![deny(clippy::all)]

//! Runs one untrusted program under CPU, wall-clock, memory and process
//! caps, then classifies how it ended.

mod error;
mod limits;
mod outcome;
mod pipe;
mod privilege;
mod proc;
mod supervisor;
mod utils;
mod watchdog;

pub use crate::error::LaunchError;
pub use crate::limits::{Limits, MAX_MEM_VAR, MAX_PROCESSES, MAX_TIME_VAR, WALL_TIME_FACTOR};
pub use crate::outcome::{
    ExitStatus, Outcome, Report, Thresholds, Usage, EXIT_ABNORMAL, EXIT_SUCCESS,
    MEMORY_SLACK_KB, OUT_OF_MEMORY, OUT_OF_TIME, TIME_EPSILON_MS,
};
pub use crate::privilege::{drop_to, Identity, UNPRIVILEGED_GID, UNPRIVILEGED_UID};
pub use crate::proc::{Argv, Native};
pub use crate::supervisor::{Spawn, Supervisor};

pub use nix::unistd::Pid;

/// Runs `argv` on the host with the default supervisor.
pub fn run(argv: &Argv, limits: &Limits) -> Result<Report, LaunchError> {
    Supervisor::new().run(argv, limits)
}

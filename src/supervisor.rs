use crate::error::LaunchError;
use crate::limits::Limits;
use crate::outcome::{ExitStatus, Report, Thresholds, Usage};
use crate::proc::{Argv, Native};
use crate::watchdog;

use std::io;
use std::time::Duration;

use nix::unistd::Pid;
use scopeguard::{guard, ScopeGuard};
use tracing::trace;

/// Process primitives the supervisor is built on.
///
/// `spawn` covers both branches of the fork: the child applies the caps
/// and replaces its image, the parent returns once that has happened.
pub trait Spawn {
    fn spawn(&mut self, argv: &Argv, limits: &Limits) -> Result<Pid, LaunchError>;

    /// Blocks until the child terminates without reaping it.
    fn wait_exited(&mut self, child: Pid) -> io::Result<()>;

    fn reap(&mut self, child: Pid) -> io::Result<(ExitStatus, Usage)>;

    /// Unconditional termination, called by the watchdog.
    fn terminate(child: Pid) -> nix::Result<()>;
}

#[derive(Debug)]
pub struct Supervisor<S = Native> {
    spawner: S,
    thresholds: Thresholds,
    watchdog_timeout: Option<Duration>,
}

impl Supervisor<Native> {
    pub fn new() -> Self {
        Self::with_spawner(Native)
    }
}

impl Default for Supervisor<Native> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Spawn> Supervisor<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner,
            thresholds: Thresholds::default(),
            watchdog_timeout: None,
        }
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Overrides the wall-clock limit, which defaults to `Limits::wall_time`.
    pub fn watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = Some(timeout);
        self
    }

    /// Runs one child to completion. Must be called within a tokio runtime,
    /// which drives the watchdog.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn run(&mut self, argv: &Argv, limits: &Limits) -> Result<Report, LaunchError> {
        let child = self.spawner.spawn(argv, limits)?;

        let timeout = self.watchdog_timeout.unwrap_or_else(|| limits.wall_time());
        let watchdog = guard(watchdog::arm(child, timeout, S::terminate), |w| {
            let _ = w.disarm();
        });

        if let Err(err) = self.spawner.wait_exited(child) {
            // never leave a running or unreaped child behind
            ScopeGuard::into_inner(watchdog).disarm();
            let _ = S::terminate(child);
            let _ = self.spawner.reap(child);
            return Err(LaunchError::system("wait for child", err));
        }

        let watchdog_fired = ScopeGuard::into_inner(watchdog).disarm();

        let (status, usage) = self
            .spawner
            .reap(child)
            .map_err(|err| LaunchError::system("reap child", err))?;

        let report = self
            .thresholds
            .classify(limits, status, usage, watchdog_fired);
        trace!(?report);

        Ok(report)
    }
}

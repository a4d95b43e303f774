use crate::limits::Limits;

use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

/// CPU usage within this distance of the CPU ceiling counts as a timeout.
/// Measurement granularity makes an exact comparison useless; the value is empirical.
pub const TIME_EPSILON_MS: u64 = 20;

/// Memory headroom below which a failure counts as out of memory. Empirical.
pub const MEMORY_SLACK_KB: u64 = 4000;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ABNORMAL: i32 = 255;

pub const OUT_OF_TIME: &str = "Out of time!";
pub const OUT_OF_MEMORY: &str = "Out of memory!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    TimedOut,
    OutOfMemory,
    AbnormalExit,
    ConfigurationError,
    ExecError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn from_raw(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        } else {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitStatus::Exited(0)
    }

    pub fn code(&self) -> Option<i32> {
        match *self {
            ExitStatus::Exited(code) => Some(code),
            ExitStatus::Signaled(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match *self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(sig) => Some(sig),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub user_time: u64, // microseconds
    pub sys_time: u64,  // microseconds
    pub memory: u64,    // KiB, peak resident
}

impl Usage {
    pub fn from_rusage(ru: &libc::rusage) -> Self {
        let micros = |tv: &libc::timeval| (tv.tv_sec as u64) * 1_000_000 + (tv.tv_usec as u64);
        Self {
            user_time: micros(&ru.ru_utime),
            sys_time: micros(&ru.ru_stime),
            memory: ru.ru_maxrss as u64,
        }
    }

    /// User plus system time in milliseconds, the quantity the CPU cap bounds.
    pub fn cpu_time_ms(&self) -> u64 {
        (self.user_time + self.sys_time) / 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub time_epsilon_ms: u64,
    pub memory_slack_kb: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            time_epsilon_ms: TIME_EPSILON_MS,
            memory_slack_kb: MEMORY_SLACK_KB,
        }
    }
}

impl Thresholds {
    pub fn classify(
        &self,
        limits: &Limits,
        status: ExitStatus,
        usage: Usage,
        watchdog_fired: bool,
    ) -> Report {
        let mut report = Report {
            status,
            usage,
            watchdog_fired,
            timed_out: false,
            out_of_memory: false,
        };

        if status.success() {
            return report;
        }

        let cpu_ceiling_ms = limits.cpu_seconds().saturating_mul(1000);
        report.timed_out =
            watchdog_fired || usage.cpu_time_ms() + self.time_epsilon_ms >= cpu_ceiling_ms;

        let headroom_kb = limits.max_mem_kb().saturating_sub(usage.memory);
        report.out_of_memory = headroom_kb < self.memory_slack_kb;

        report
    }
}

/// What happened to one launched program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub status: ExitStatus,
    pub usage: Usage,
    pub watchdog_fired: bool,
    pub timed_out: bool,
    pub out_of_memory: bool,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.status.success()
    }

    /// Both resource outcomes are reported when both thresholds were hit.
    pub fn outcomes(&self) -> Vec<Outcome> {
        if self.is_success() {
            return vec![Outcome::Success];
        }
        let mut outcomes = Vec::with_capacity(2);
        if self.timed_out {
            outcomes.push(Outcome::TimedOut);
        }
        if self.out_of_memory {
            outcomes.push(Outcome::OutOfMemory);
        }
        if outcomes.is_empty() {
            outcomes.push(Outcome::AbnormalExit);
        }
        outcomes
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_ABNORMAL
        }
    }

    pub fn write_usage(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "CPU time (milliseconds) {}", self.usage.cpu_time_ms())?;
        writeln!(out, "Memory (kilobytes) {}", self.usage.memory)?;
        Ok(())
    }

    pub fn write_diagnostics(&self, out: &mut impl Write) -> io::Result<()> {
        for outcome in self.outcomes() {
            match outcome {
                Outcome::TimedOut => writeln!(out, "{}", OUT_OF_TIME)?,
                Outcome::OutOfMemory => writeln!(out, "{}", OUT_OF_MEMORY)?,
                Outcome::AbnormalExit => writeln!(out, "Abnormal exit: {}", self.status)?,
                _ => {}
            }
        }
        Ok(())
    }
}

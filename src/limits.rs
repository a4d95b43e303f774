use crate::error::LaunchError;

use std::ffi::OsString;
use std::io;
use std::time::Duration;

use rlimit::Resource;
use serde::Serialize;

pub const MAX_TIME_VAR: &str = "MAX_TIME";
pub const MAX_MEM_VAR: &str = "MAX_MEM";

const MAX_TIME_MEANING: &str = "a positive CPU time limit in milliseconds";
const MAX_MEM_MEANING: &str = "a positive memory limit in kilobytes";

/// The judged program may run but never spawn.
pub const MAX_PROCESSES: u64 = 1;

/// Wall-clock budget as a multiple of the CPU budget.
pub const WALL_TIME_FACTOR: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    max_time_ms: u64,
    max_mem_kb: u64,
    cpu_seconds: u64,
    mem_bytes: u64,
}

impl Limits {
    pub fn new(max_time_ms: u64, max_mem_kb: u64) -> Result<Self, LaunchError> {
        if max_time_ms == 0 {
            return Err(LaunchError::InvalidVar {
                name: MAX_TIME_VAR,
                value: max_time_ms.to_string(),
                meaning: MAX_TIME_MEANING,
            });
        }
        let mem_bytes = match max_mem_kb.checked_mul(1024) {
            Some(bytes) if max_mem_kb > 0 => bytes,
            _ => {
                return Err(LaunchError::InvalidVar {
                    name: MAX_MEM_VAR,
                    value: max_mem_kb.to_string(),
                    meaning: MAX_MEM_MEANING,
                })
            }
        };

        // sub-second budgets still reserve a whole second of CPU
        let cpu_seconds = max_time_ms / 1000 + u64::from(max_time_ms % 1000 != 0);

        Ok(Self {
            max_time_ms,
            max_mem_kb,
            cpu_seconds,
            mem_bytes,
        })
    }

    pub fn from_env() -> Result<Self, LaunchError> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self, LaunchError> {
        let max_time_ms = read_positive(&lookup, MAX_TIME_VAR, MAX_TIME_MEANING)?;
        let max_mem_kb = read_positive(&lookup, MAX_MEM_VAR, MAX_MEM_MEANING)?;
        Self::new(max_time_ms, max_mem_kb)
    }

    pub fn max_time_ms(&self) -> u64 {
        self.max_time_ms
    }

    pub fn max_mem_kb(&self) -> u64 {
        self.max_mem_kb
    }

    pub fn cpu_seconds(&self) -> u64 {
        self.cpu_seconds
    }

    pub fn mem_bytes(&self) -> u64 {
        self.mem_bytes
    }

    pub fn max_processes(&self) -> u64 {
        MAX_PROCESSES
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_secs(self.cpu_seconds.saturating_mul(WALL_TIME_FACTOR))
    }

    /// Applies the caps to the calling process.
    ///
    /// Runs in the forked child right before exec, so it must stay
    /// async-signal-safe: no allocation, no locks.
    pub(crate) fn apply(&self) -> io::Result<()> {
        set_hard(Resource::NPROC, MAX_PROCESSES)?;
        set_hard(Resource::AS, self.mem_bytes)?;
        set_hard(Resource::CPU, self.cpu_seconds)?;
        Ok(())
    }
}

fn set_hard(resource: Resource, n: u64) -> io::Result<()> {
    resource.set(n, n)
}

fn read_positive(
    lookup: &impl Fn(&str) -> Option<OsString>,
    name: &'static str,
    meaning: &'static str,
) -> Result<u64, LaunchError> {
    let raw = lookup(name).ok_or(LaunchError::MissingVar { name, meaning })?;
    let invalid = |value: String| LaunchError::InvalidVar {
        name,
        value,
        meaning,
    };

    let text = raw
        .into_string()
        .map_err(|raw| invalid(raw.to_string_lossy().into_owned()))?;

    match text.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n as u64),
        _ => Err(invalid(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = vars
            .iter()
            .map(|&(k, v)| (k.to_owned(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn derives_caps() {
        let limits = Limits::new(2500, 65536).unwrap();
        assert_eq!(limits.cpu_seconds(), 3);
        assert_eq!(limits.mem_bytes(), 64 * 1024 * 1024);
        assert_eq!(limits.max_processes(), 1);
        assert_eq!(limits.wall_time(), Duration::from_secs(9));
    }

    #[test]
    fn cpu_seconds_round_up() {
        assert_eq!(Limits::new(1, 1).unwrap().cpu_seconds(), 1);
        assert_eq!(Limits::new(999, 1).unwrap().cpu_seconds(), 1);
        assert_eq!(Limits::new(1000, 1).unwrap().cpu_seconds(), 1);
        assert_eq!(Limits::new(1001, 1).unwrap().cpu_seconds(), 2);
    }

    #[test]
    fn reads_environment() {
        let limits = Limits::from_lookup(lookup(&[("MAX_TIME", "1000"), ("MAX_MEM", "262144")]))
            .unwrap();
        assert_eq!(limits.max_time_ms(), 1000);
        assert_eq!(limits.max_mem_kb(), 262144);
    }

    #[test]
    fn missing_variable() {
        let err = Limits::from_lookup(lookup(&[("MAX_MEM", "1024")])).unwrap_err();
        assert!(matches!(err, LaunchError::MissingVar { name: "MAX_TIME", .. }));
        assert!(err.to_string().contains("milliseconds"));

        let err = Limits::from_lookup(lookup(&[("MAX_TIME", "1024")])).unwrap_err();
        assert!(matches!(err, LaunchError::MissingVar { name: "MAX_MEM", .. }));
        assert!(err.to_string().contains("kilobytes"));
    }

    #[test]
    fn rejects_non_positive() {
        for bad in &["0", "-5", "abc", "", "1.5"] {
            let err = Limits::from_lookup(lookup(&[("MAX_TIME", *bad), ("MAX_MEM", "1024")]))
                .unwrap_err();
            match err {
                LaunchError::InvalidVar { name, value, .. } => {
                    assert_eq!(name, "MAX_TIME");
                    assert_eq!(value, *bad);
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[test]
    fn rejects_overflowing_memory() {
        let err = Limits::new(1000, u64::MAX / 2).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidVar { name: "MAX_MEM", .. }));
    }
}

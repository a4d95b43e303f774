use crate::error::LaunchError;
use crate::limits::Limits;
use crate::outcome::{ExitStatus, Usage};
use crate::pipe::{self, ChildFailure, ChildStage, PipeTx};
use crate::supervisor::Spawn;
use crate::utils::{libc_call, retry_eintr};
use crate::watchdog::send_signal;

use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::{io, mem, ptr};

use nix::sys::signal::Signal;
use nix::unistd::{self, ForkResult, Pid};
use tracing::trace;

/// Exit code of a child that never reached the target program.
const CHILD_FAILED: i32 = 127;

/// A null-terminated argument vector, built before forking so that the
/// child never allocates.
pub struct Argv {
    cstrings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl Argv {
    pub fn new<I, S>(args: I) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cstrings = Vec::new();
        for a in args {
            let a = a.as_ref();
            let c = CString::new(a.as_bytes()).map_err(|_| LaunchError::InvalidVar {
                name: "argv",
                value: a.to_string_lossy().into_owned(),
                meaning: "an argument without NUL bytes",
            })?;
            cstrings.push(c);
        }
        if cstrings.is_empty() {
            return Err(LaunchError::MissingCommand);
        }

        let mut ptrs: Vec<_> = cstrings.iter().map(|c| c.as_ptr()).collect();
        ptrs.push(ptr::null());

        Ok(Self { cstrings, ptrs })
    }

    pub fn bin(&self) -> &CStr {
        &self.cstrings[0]
    }

    pub fn args(&self) -> impl Iterator<Item = &CStr> {
        self.cstrings.iter().map(|c| c.as_c_str())
    }
}

impl std::fmt::Debug for Argv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.args()).finish()
    }
}

/// Real fork/exec/wait on the host.
#[derive(Debug, Default)]
pub struct Native;

impl Spawn for Native {
    fn spawn(&mut self, argv: &Argv, limits: &Limits) -> Result<Pid, LaunchError> {
        let (pipe_tx, pipe_rx) =
            pipe::create().map_err(|err| LaunchError::system("create pipe", err))?;

        match unsafe { unistd::fork() }.map_err(|err| LaunchError::system("fork", err))? {
            ForkResult::Child => {
                drop(pipe_rx);
                run_child(argv, limits, pipe_tx)
            }
            ForkResult::Parent { child } => {
                drop(pipe_tx);
                trace!(?child, "forked");

                let failure = match pipe_rx.read_failure() {
                    Ok(failure) => failure,
                    Err(err) => {
                        let _ = send_signal(child, Signal::SIGKILL);
                        let _ = reap(child);
                        return Err(LaunchError::system("read child result", err));
                    }
                };

                match failure {
                    None => Ok(child),
                    Some(failure) => {
                        let _ = reap(child);
                        Err(failure_to_error(argv, failure))
                    }
                }
            }
        }
    }

    fn wait_exited(&mut self, child: Pid) -> io::Result<()> {
        wait_exited(child)
    }

    fn reap(&mut self, child: Pid) -> io::Result<(ExitStatus, Usage)> {
        reap(child)
    }

    fn terminate(child: Pid) -> nix::Result<()> {
        send_signal(child, Signal::SIGKILL)
    }
}

/// The child branch. Applies the caps and replaces the image; returns only by exiting.
fn run_child(argv: &Argv, limits: &Limits, pipe_tx: PipeTx) -> ! {
    let (stage, err) = match limits.apply() {
        Err(err) => (ChildStage::Limits, err),
        Ok(()) => {
            unsafe { libc::execvp(argv.ptrs[0], argv.ptrs.as_ptr()) };
            (ChildStage::Exec, io::Error::last_os_error())
        }
    };

    let errno = err.raw_os_error().unwrap_or(libc::EINVAL);
    let _ = pipe_tx.write_failure(stage, errno);
    unsafe { libc::_exit(CHILD_FAILED) }
}

fn failure_to_error(argv: &Argv, failure: ChildFailure) -> LaunchError {
    match failure.stage {
        ChildStage::Limits => LaunchError::Limits(failure.error),
        ChildStage::Exec => LaunchError::Exec {
            bin: argv.bin().to_string_lossy().into_owned(),
            source: failure.error,
        },
    }
}

/// Blocks until the child has terminated, leaving it unreaped.
///
/// The zombie keeps its pid reserved, so nothing can be signalled by
/// mistake until `reap` is called.
pub fn wait_exited(child: Pid) -> io::Result<()> {
    let pid = child.as_raw() as libc::id_t;
    let mut info: libc::siginfo_t = unsafe { mem::zeroed() };

    retry_eintr(|| {
        libc_call(|| unsafe {
            libc::waitid(libc::P_PID, pid, &mut info, libc::WEXITED | libc::WNOWAIT)
        })
    })?;

    trace!(?child, "child terminated");
    Ok(())
}

/// Reaps the child and returns its status with its own resource usage.
pub fn reap(child: Pid) -> io::Result<(ExitStatus, Usage)> {
    let mut status: libc::c_int = 0;
    let mut ru: libc::rusage = unsafe { mem::zeroed() };

    retry_eintr(|| libc_call(|| unsafe { libc::wait4(child.as_raw(), &mut status, 0, &mut ru) }))?;

    let status = ExitStatus::from_raw(status);
    let usage = Usage::from_rusage(&ru);
    trace!(?child, ?status, ?usage, "child reaped");

    Ok((status, usage))
}

use crate::utils::libc_call;

use std::io::{self, Read};
use std::os::unix::io::{FromRawFd, RawFd};
use std::{fs, mem};

/// What the child was doing when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ChildStage {
    Limits = 1,
    Exec = 2,
}

#[derive(Debug)]
pub struct ChildFailure {
    pub stage: ChildStage,
    pub error: io::Error,
}

const MSG_LEN: usize = 8;

pub struct PipeTx(RawFd);
pub struct PipeRx(RawFd);

impl Drop for PipeTx {
    fn drop(&mut self) {
        let _ = unsafe { libc::close(self.0) };
    }
}

impl Drop for PipeRx {
    fn drop(&mut self) {
        let _ = unsafe { libc::close(self.0) };
    }
}

/// Both ends are close-on-exec: a successful exec closes the write end
/// and the reader sees EOF.
pub fn create() -> io::Result<(PipeTx, PipeRx)> {
    let mut fds = [0, 0];
    libc_call(|| unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    let rx = PipeRx(fds[0]);
    let tx = PipeTx(fds[1]);
    Ok((tx, rx))
}

impl PipeTx {
    /// Called in the forked child, so only raw `write` is used.
    pub fn write_failure(self, stage: ChildStage, errno: i32) -> io::Result<()> {
        let mut buf = [0u8; MSG_LEN];
        buf[..4].copy_from_slice(&(stage as i32).to_ne_bytes());
        buf[4..].copy_from_slice(&errno.to_ne_bytes());

        let mut written = 0;
        while written < MSG_LEN {
            let ret = unsafe {
                libc::write(
                    self.0,
                    buf[written..].as_ptr().cast(),
                    MSG_LEN - written,
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            written += ret as usize;
        }
        Ok(())
    }
}

impl PipeRx {
    /// Blocks until the child has either exec'd (`None`) or reported a failure.
    pub fn read_failure(self) -> io::Result<Option<ChildFailure>> {
        let mut buf = Vec::with_capacity(MSG_LEN);
        unsafe {
            let file = fs::File::from_raw_fd(self.0);
            let ret = (&file).take(MSG_LEN as u64).read_to_end(&mut buf);
            mem::forget(file);
            ret?;
        }

        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() != MSG_LEN {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated child failure message",
            ));
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&buf[..4]);
        let stage = match i32::from_ne_bytes(word) {
            1 => ChildStage::Limits,
            2 => ChildStage::Exec,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown child stage: {}", other),
                ))
            }
        };
        word.copy_from_slice(&buf[4..]);
        let error = io::Error::from_raw_os_error(i32::from_ne_bytes(word));

        Ok(Some(ChildFailure { stage, error }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_means_no_failure() {
        let (tx, rx) = create().unwrap();
        drop(tx);
        assert!(rx.read_failure().unwrap().is_none());
    }

    #[test]
    fn carries_stage_and_errno() {
        let (tx, rx) = create().unwrap();
        tx.write_failure(ChildStage::Exec, libc::ENOENT).unwrap();
        let failure = rx.read_failure().unwrap().unwrap();
        assert_eq!(failure.stage, ChildStage::Exec);
        assert_eq!(failure.error.raw_os_error(), Some(libc::ENOENT));
    }
}

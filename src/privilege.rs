use crate::error::LaunchError;

use nix::unistd::{self, Gid, Uid};
use tracing::trace;

pub const UNPRIVILEGED_UID: u32 = 1000;
pub const UNPRIVILEGED_GID: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uid,
    pub gid: Gid,
}

impl Identity {
    pub fn unprivileged() -> Self {
        Self {
            uid: Uid::from_raw(UNPRIVILEGED_UID),
            gid: Gid::from_raw(UNPRIVILEGED_GID),
        }
    }
}

/// Irreversibly switches the whole process to `id`.
///
/// Must run before any thread or child exists. Groups go first: once the
/// uid is gone the gid can no longer change.
pub fn drop_to(id: Identity) -> Result<(), LaunchError> {
    let denied =
        |op: &'static str| move |source: nix::Error| LaunchError::Privilege { op, source };

    unistd::setresgid(id.gid, id.gid, id.gid).map_err(denied("setresgid"))?;
    unistd::setgroups(&[id.gid]).map_err(denied("setgroups"))?;
    unistd::setresuid(id.uid, id.uid, id.uid).map_err(denied("setresuid"))?;

    if Gid::effective() != id.gid || Uid::effective() != id.uid {
        return Err(LaunchError::Privilege {
            op: "verify identity",
            source: nix::Error::EPERM,
        });
    }

    trace!(uid = %id.uid, gid = %id.gid, "privileges dropped");
    Ok(())
}

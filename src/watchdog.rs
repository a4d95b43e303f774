use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{trace, warn};

/// The child the watchdog may kill. Emptied by whichever side gets to it first:
/// the watchdog when it fires, or the supervisor once the child has terminated.
#[derive(Debug)]
pub struct ChildSlot(Mutex<Option<Pid>>);

impl ChildSlot {
    pub fn new(child: Pid) -> Self {
        Self(Mutex::new(Some(child)))
    }

    /// Runs `f` on the child if the slot still holds one, emptying it.
    /// The lock is held for the whole call, so a concurrent `take` cannot
    /// return while `f` is still running.
    fn take_with<R>(&self, f: impl FnOnce(Pid) -> R) -> Option<R> {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take().map(f)
    }

    pub fn take(&self) -> Option<Pid> {
        self.take_with(|pid| pid)
    }
}

pub struct Watchdog {
    slot: Arc<ChildSlot>,
    handle: JoinHandle<()>,
}

/// Arms a one-shot wall-clock watchdog on the current tokio runtime.
pub fn arm(child: Pid, timeout: Duration, terminate: fn(Pid) -> nix::Result<()>) -> Watchdog {
    let slot = Arc::new(ChildSlot::new(child));

    let handle = task::spawn({
        let slot = Arc::clone(&slot);
        async move {
            time::sleep(timeout).await;
            if let Some(result) = slot.take_with(terminate) {
                warn!(?child, ?timeout, ?result, "wall-clock limit reached, child killed");
            }
        }
    });

    trace!(?child, ?timeout, "watchdog armed");
    Watchdog { slot, handle }
}

impl Watchdog {
    /// Stops the watchdog. Returns `true` if it had already fired.
    pub fn disarm(self) -> bool {
        let fired = self.slot.take().is_none();
        self.handle.abort();
        trace!(fired, "watchdog disarmed");
        fired
    }
}

pub fn send_signal(pid: Pid, signal: Signal) -> nix::Result<()> {
    let result = signal::kill(pid, signal);
    trace!(
        "kill pid = {}, signal = {}, result = {:?}",
        pid,
        signal,
        result
    );
    result
}

//! Cooperative processes: `async` blocks driven by the event loop.
//!
//! A process is polled only from inside the loop, when an event it awaits is
//! processed.  Polling uses a no-op waker: readiness is signalled by event
//! callbacks, never by the waker.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use tracing::debug;

use lsim_core::{LsimResult, ProcessId};

use crate::environment::{Core, Environment};
use crate::event::{Event, EventValue, Wait};

/// A pinned, boxed, single-threaded future.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

pub(crate) struct ProcessSlot {
    /// `None` while the future is being polled.
    pub(crate) future: Option<LocalBoxFuture<'static, LsimResult<EventValue>>>,
    pub(crate) done:   Event,
}

/// Handle to a spawned process.
#[derive(Clone, Debug)]
pub struct Process {
    id:   ProcessId,
    done: Event,
    core: Weak<Core>,
}

impl Process {
    #[inline]
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Triggers with the process's return value when it finishes.
    pub fn done(&self) -> &Event {
        &self.done
    }

    /// `true` until the process has returned.
    pub fn is_alive(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|c| c.processes.borrow().contains_key(&self.id))
    }
}

impl IntoFuture for Process {
    type Output = EventValue;
    type IntoFuture = Wait;

    fn into_future(self) -> Wait {
        self.done.into_future()
    }
}

impl IntoFuture for &Process {
    type Output = EventValue;
    type IntoFuture = Wait;

    fn into_future(self) -> Wait {
        self.done.clone().into_future()
    }
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

pub(crate) fn spawn<F>(env: &Environment, future: F) -> Process
where
    F: Future<Output = LsimResult<EventValue>> + 'static,
{
    let pid = env.next_process_id();
    let done = env.event();
    env.core.processes.borrow_mut().insert(
        pid,
        ProcessSlot { future: Some(Box::pin(future)), done: done.clone() },
    );

    let init = env.event();
    init.add_resume(pid);
    // A fresh event cannot already be triggered.
    let _ = init.succeed(EventValue::Empty);
    debug!(process = %pid, t = env.now(), "process spawned");

    Process { id: pid, done, core: Rc::downgrade(&env.core) }
}

/// Poll process `pid` once.  A finished or unknown process is ignored.
pub(crate) fn resume(core: &Rc<Core>, pid: ProcessId) {
    let taken = core
        .processes
        .borrow_mut()
        .get_mut(&pid)
        .and_then(|slot| slot.future.take());
    let Some(mut future) = taken else { return };

    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    let previous = core.active.replace(Some(pid));
    let poll = future.as_mut().poll(&mut cx);
    core.active.set(previous);

    match poll {
        Poll::Pending => {
            if let Some(slot) = core.processes.borrow_mut().get_mut(&pid) {
                slot.future = Some(future);
            }
        }
        Poll::Ready(result) => {
            let slot = core.processes.borrow_mut().remove(&pid);
            match result {
                Ok(value) => {
                    debug!(process = %pid, t = core.now.get(), "process finished");
                    if let Some(slot) = slot {
                        if let Err(err) = slot.done.succeed(value) {
                            core.fail(pid, err);
                        }
                    }
                }
                Err(err) => core.fail(pid, err),
            }
        }
    }
}

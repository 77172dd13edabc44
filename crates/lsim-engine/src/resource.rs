//! Counted resource with a strict FIFO request queue.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use lsim_core::{LsimError, LsimResult, RequestId, ResourceId};

use crate::environment::Environment;
use crate::event::{Event, EventValue};

/// One request made against a [`Resource`].
///
/// `event` triggers when the request is granted; `token` is what
/// [`Resource::release`] takes back.
#[derive(Clone, Debug)]
pub struct Request {
    pub token: RequestId,
    pub event: Event,
}

struct ResourceState {
    users: Vec<RequestId>,
    queue: VecDeque<(RequestId, Event)>,
}

struct ResourceInner {
    id:       ResourceId,
    env:      Environment,
    capacity: usize,
    state:    RefCell<ResourceState>,
}

/// A resource with `capacity` identical units.  Clones share state.
#[derive(Clone)]
pub struct Resource {
    inner: Rc<ResourceInner>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("capacity", &self.inner.capacity)
            .field("count", &self.count())
            .field("queued", &self.queue_len())
            .finish()
    }
}

impl Resource {
    pub fn new(env: &Environment, capacity: usize) -> LsimResult<Self> {
        if capacity == 0 {
            return Err(LsimError::Config("resource capacity must be at least 1".into()));
        }
        Ok(Self {
            inner: Rc::new(ResourceInner {
                id: env.next_resource_id(),
                env: env.clone(),
                capacity,
                state: RefCell::new(ResourceState { users: Vec::new(), queue: VecDeque::new() }),
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Units currently granted.
    pub fn count(&self) -> usize {
        self.inner.state.borrow().users.len()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// `true` when `token` currently holds a unit.
    pub fn is_held(&self, token: RequestId) -> bool {
        self.inner.state.borrow().users.contains(&token)
    }

    /// Ask for one unit.  Granted at once if a unit is free and nobody is
    /// queued, otherwise queued behind earlier requests.
    pub fn request(&self) -> Request {
        let token = self.inner.env.next_request_id();
        let event = self.inner.env.event();
        let granted = {
            let mut st = self.inner.state.borrow_mut();
            if st.users.len() < self.inner.capacity && st.queue.is_empty() {
                st.users.push(token);
                true
            } else {
                st.queue.push_back((token, event.clone()));
                false
            }
        };
        if granted {
            // A fresh event cannot already be triggered.
            let _ = event.succeed(EventValue::Empty);
        }
        Request { token, event }
    }

    /// Give back the unit held by `token`, or withdraw it from the queue.
    /// Freed units go to the head of the queue at the current time.
    pub fn release(&self, token: RequestId) -> LsimResult<()> {
        let granted = {
            let mut st = self.inner.state.borrow_mut();
            if let Some(pos) = st.users.iter().position(|&t| t == token) {
                st.users.remove(pos);
            } else if let Some(pos) = st.queue.iter().position(|(t, _)| *t == token) {
                st.queue.remove(pos);
            } else {
                return Err(LsimError::UnknownRequest(token));
            }

            let mut granted = Vec::new();
            while st.users.len() < self.inner.capacity {
                let Some((next, event)) = st.queue.pop_front() else { break };
                st.users.push(next);
                granted.push(event);
            }
            granted
        };
        for event in granted {
            event.succeed(EventValue::Empty)?;
        }
        Ok(())
    }
}

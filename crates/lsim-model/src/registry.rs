//! Name and id indices over the activities of one model.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use lsim_core::ActivityId;
use lsim_engine::Process;

use crate::expr::ActivityRef;

#[derive(Default)]
struct RegistryInner {
    by_name: FxHashMap<String, Vec<ActivityId>>,
    by_id:   FxHashMap<ActivityId, String>,
    main:    FxHashMap<ActivityId, Process>,
}

/// Shared lookup tables: `name → ids`, `id → name`, and `id → main process`.
///
/// Every activity built with the same registry is indexed here on
/// construction; its main process is recorded when it is registered.
/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Registry")
            .field("activities", &inner.by_id.len())
            .field("registered", &inner.main.len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when both handles share the same tables.
    pub fn same_as(&self, other: &Registry) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn add(&self, id: ActivityId, name: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.by_name.entry(name.to_owned()).or_default().push(id);
        inner.by_id.insert(id, name.to_owned());
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().by_id.is_empty()
    }

    pub fn contains(&self, id: ActivityId) -> bool {
        self.inner.borrow().by_id.contains_key(&id)
    }

    pub fn name_of(&self, id: ActivityId) -> Option<String> {
        self.inner.borrow().by_id.get(&id).cloned()
    }

    pub fn ids_named(&self, name: &str) -> Vec<ActivityId> {
        self.inner.borrow().by_name.get(name).cloned().unwrap_or_default()
    }

    /// Activities matched by `r`: the id when it is known, else every
    /// activity with the name.
    pub fn resolve(&self, r: &ActivityRef) -> Vec<ActivityId> {
        if let Some(id) = r.id.filter(|id| self.contains(*id)) {
            return vec![id];
        }
        r.name.as_deref().map(|n| self.ids_named(n)).unwrap_or_default()
    }

    pub(crate) fn set_main(&self, id: ActivityId, process: Process) {
        self.inner.borrow_mut().main.insert(id, process);
    }

    pub(crate) fn clear_main(&self, id: ActivityId) {
        self.inner.borrow_mut().main.remove(&id);
    }

    /// The main process of the latest registration of `id`.
    pub fn main(&self, id: ActivityId) -> Option<Process> {
        self.inner.borrow().main.get(&id).cloned()
    }
}

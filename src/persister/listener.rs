use crate::core::{Entity, PersistError, Value};
use log::warn;
use std::fmt;
use std::sync::{Arc, RwLock};

type Before<I> = Arc<dyn Fn(&I) + Send + Sync>;
type After<I, O> = Arc<dyn Fn(&I, &O) + Send + Sync>;
type OnError<I> = Arc<dyn Fn(&I, &PersistError) + Send + Sync>;

/// Ordered callbacks around one kind of persister operation. `I` is the
/// batch handed to the operation, `O` its outcome.
pub struct ListenerSet<I: ?Sized, O: ?Sized> {
    before: RwLock<Vec<Before<I>>>,
    after: RwLock<Vec<After<I, O>>>,
    error: RwLock<Vec<OnError<I>>>,
}

impl<I: ?Sized, O: ?Sized> ListenerSet<I, O> {
    pub fn new() -> Self {
        Self {
            before: RwLock::new(Vec::new()),
            after: RwLock::new(Vec::new()),
            error: RwLock::new(Vec::new()),
        }
    }

    pub fn before(&self, listener: impl Fn(&I) + Send + Sync + 'static) {
        let listener: Before<I> = Arc::new(listener);
        push(&self.before, listener);
    }

    pub fn after(&self, listener: impl Fn(&I, &O) + Send + Sync + 'static) {
        let listener: After<I, O> = Arc::new(listener);
        push(&self.after, listener);
    }

    pub fn on_error(&self, listener: impl Fn(&I, &PersistError) + Send + Sync + 'static) {
        let listener: OnError<I> = Arc::new(listener);
        push(&self.error, listener);
    }

    pub fn is_empty(&self) -> bool {
        snapshot(&self.before).is_empty()
            && snapshot(&self.after).is_empty()
            && snapshot(&self.error).is_empty()
    }

    // Listeners run on a copy of the list so that one of them may register
    // another without deadlocking.
    pub(crate) fn fire_before(&self, input: &I) {
        for listener in snapshot(&self.before) {
            listener(input);
        }
    }

    pub(crate) fn fire_after(&self, input: &I, output: &O) {
        for listener in snapshot(&self.after) {
            listener(input, output);
        }
    }

    pub(crate) fn fire_error(&self, input: &I, error: &PersistError) {
        for listener in snapshot(&self.error) {
            listener(input, error);
        }
    }
}

impl<I: ?Sized, O: ?Sized> Default for ListenerSet<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ?Sized, O: ?Sized> fmt::Debug for ListenerSet<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("before", &snapshot(&self.before).len())
            .field("after", &snapshot(&self.after).len())
            .field("error", &snapshot(&self.error).len())
            .finish()
    }
}

fn push<T>(list: &RwLock<Vec<T>>, item: T) {
    match list.write() {
        Ok(mut guard) => guard.push(item),
        Err(poisoned) => {
            warn!("Listener registry poisoned, recovering");
            poisoned.into_inner().push(item)
        }
    }
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    match list.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Listeners of one entity persister. Each fires once per batch it is given,
/// cascaded batches included.
#[derive(Debug, Default)]
pub struct PersisterListeners {
    pub insert: ListenerSet<[Entity], ()>,
    pub update: ListenerSet<[Entity], ()>,
    pub delete: ListenerSet<[Entity], ()>,
    pub delete_by_id: ListenerSet<[Value], ()>,
    /// Input: requested identifiers, empty for `select_all`.
    pub select: ListenerSet<[Value], [Entity]>,
    pub persist: ListenerSet<[Entity], ()>,
}

impl PersisterListeners {
    pub fn new() -> Self {
        Self::default()
    }
}

//! Ids of the actors whose positions drive the proximity classifier.

use fogwar_common::{ActorId, ActorSample};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

type Listener = Arc<dyn Fn(&BTreeSet<ActorId>) + Send + Sync>;

#[derive(Default)]
pub struct ActorRegistry {
    ids: RwLock<BTreeSet<ActorId>>,
    listeners: RwLock<Vec<Listener>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the full membership after every change.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&BTreeSet<ActorId>) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn add(&self, id: ActorId) -> bool {
        let added = self.ids.write().insert(id);
        if added {
            self.notify();
        }
        added
    }

    pub fn remove(&self, id: ActorId) -> bool {
        let removed = self.ids.write().remove(&id);
        if removed {
            self.notify();
        }
        removed
    }

    /// Add every id; returns how many were new.
    pub fn extend<I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = ActorId>,
    {
        let added = {
            let mut set = self.ids.write();
            ids.into_iter().filter(|id| set.insert(*id)).count()
        };
        if added > 0 {
            self.notify();
        }
        added
    }

    /// Replace the membership; returns whether it changed.
    pub fn replace<I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = ActorId>,
    {
        let next: BTreeSet<ActorId> = ids.into_iter().collect();
        let changed = {
            let mut set = self.ids.write();
            if *set == next {
                false
            } else {
                *set = next;
                true
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    pub fn clear(&self) -> bool {
        self.replace(std::iter::empty())
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.ids.read().contains(id)
    }

    pub fn ids(&self) -> BTreeSet<ActorId> {
        self.ids.read().clone()
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Samples belonging to registered actors.
    pub fn tracked(&self, samples: Vec<ActorSample>) -> Vec<ActorSample> {
        let ids = self.ids.read();
        samples.into_iter().filter(|s| ids.contains(&s.id)).collect()
    }

    fn notify(&self) {
        let ids = self.ids();
        let listeners = self.listeners.read().clone();
        tracing::debug!(actors = ids.len(), "actor registry changed");
        for listener in listeners {
            listener(&ids);
        }
    }
}

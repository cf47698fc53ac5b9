//! Listener traits and the weak registries the session keeps them in.
//!
//! The session never owns a listener: it holds a `Weak` and drops the
//! registration on the first tick after the listener is gone. All callbacks
//! run on the tick thread.

use crate::types::{FramePair, PoseSample, SharedPointCloud, TangoEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Receives resolved poses once per tick for each frame pair it asked for.
pub trait PoseListener: Send + Sync {
    fn on_pose_available(&self, pose: &PoseSample, requested: FramePair);
}

/// Receives service events and connection changes.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TangoEvent);

    fn on_connect(&self) {}

    fn on_disconnect(&self) {}
}

/// Receives the newest depth snapshot once per tick.
pub trait PointCloudListener: Send + Sync {
    fn on_point_cloud(&self, cloud: &SharedPointCloud);
}

/// Stable handle of a registration.
pub type ListenerId = usize;

struct Slot<L: ?Sized, D> {
    listener: Weak<L>,
    data: D,
}

/// Slab of weak listener registrations. Ids stay stable until removed.
pub struct ListenerSet<L: ?Sized, D = ()> {
    slots: Vec<Option<Slot<L, D>>>,
}

impl<L: ?Sized, D> Default for ListenerSet<L, D> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<L: ?Sized, D> ListenerSet<L, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Weak<L>, data: D) -> ListenerId {
        let slot = Some(Slot { listener, data });
        match self.slots.iter().position(Option::is_none) {
            Some(id) => {
                self.slots[id] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.slots.get_mut(id).and_then(Option::take).is_some()
    }

    /// Drop registrations whose listener has been destroyed.
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.listener.strong_count() == 0) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn get(&self, id: ListenerId) -> Option<Arc<L>> {
        self.slots
            .get(id)
            .and_then(Option::as_ref)
            .and_then(|s| s.listener.upgrade())
    }

    /// Live registrations with their attached data.
    pub fn iter(&self) -> impl Iterator<Item = (ListenerId, Arc<L>, &D)> + '_ {
        self.slots.iter().enumerate().filter_map(|(id, slot)| {
            let slot = slot.as_ref()?;
            slot.listener.upgrade().map(|l| (id, l, &slot.data))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pose listeners and the frame pairs each one requested.
pub type PoseListeners = ListenerSet<dyn PoseListener, Vec<FramePair>>;
pub type EventListeners = ListenerSet<dyn EventListener>;
pub type PointCloudListeners = ListenerSet<dyn PointCloudListener>;

/// Run one listener callback; a panic is logged and swallowed so the
/// remaining listeners still get their delivery.
pub(crate) fn guarded<F: FnOnce()>(what: &str, id: ListenerId, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("{} listener {} panicked; continuing with the others", what, id);
    }
}

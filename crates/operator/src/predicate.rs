//! Update filters applied to the watch streams that trigger reconciles.
//!
//! Status patches written by the synchronizer come back through the watch as
//! update events. Reconciling them would loop forever, so an update whose
//! only change is its status is dropped. Any other update (a spec edit, a
//! finalizer or deletion change, a resync) is reconciled.
//!
//! The filters run on the trigger stream, one watch event at a time.
//! Requeues scheduled by a reconcile go straight to the controller's
//! scheduler and never pass through them.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{stream, Stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::{reflector::ObjectRef, watcher};
use kube::Resource;
use tracing::{error, trace};

use crate::crd::{AlertDefinition, AlertGroupConfig};

/// An update event, tagged with the kind of the object it carries.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    AlertDefinition {
        old: Option<Arc<AlertDefinition>>,
        new: Option<Arc<AlertDefinition>>,
    },
    AlertGroupConfig {
        old: Option<Arc<AlertGroupConfig>>,
        new: Option<Arc<AlertGroupConfig>>,
    },
    Other {
        has_old: bool,
        has_new: bool,
    },
}

/// Decide whether `event` warrants a reconcile.
pub fn should_reconcile(event: &UpdateEvent) -> bool {
    match event {
        UpdateEvent::AlertDefinition { old, new } => match (old, new) {
            (Some(old), Some(new)) => {
                changed_outside_status(&old.metadata, &new.metadata, old.spec != new.spec)
                    || old.status == new.status
            }
            _ => missing_object(event),
        },
        UpdateEvent::AlertGroupConfig { old, new } => match (old, new) {
            (Some(old), Some(new)) => {
                changed_outside_status(&old.metadata, &new.metadata, old.spec != new.spec)
                    || old.status == new.status
            }
            _ => missing_object(event),
        },
        UpdateEvent::Other { has_old, has_new } => {
            if *has_old && *has_new {
                true
            } else {
                missing_object(event)
            }
        }
    }
}

// A watch can skip intermediate versions, so one event may carry a spec
// edit together with a status patch.
fn changed_outside_status(old: &ObjectMeta, new: &ObjectMeta, spec_changed: bool) -> bool {
    spec_changed
        || old.generation != new.generation
        || old.deletion_timestamp != new.deletion_timestamp
        || old.finalizers != new.finalizers
}

fn missing_object(event: &UpdateEvent) -> bool {
    error!(?event, "update event is missing its old or new object");
    false
}

/// Kinds whose update events can be built from an old/new pair.
pub trait Observed: Resource + Clone + Sized {
    fn update_event(old: Option<Arc<Self>>, new: Option<Arc<Self>>) -> UpdateEvent;
}

impl Observed for AlertDefinition {
    fn update_event(old: Option<Arc<Self>>, new: Option<Arc<Self>>) -> UpdateEvent {
        UpdateEvent::AlertDefinition { old, new }
    }
}

impl Observed for AlertGroupConfig {
    fn update_event(old: Option<Arc<Self>>, new: Option<Arc<Self>>) -> UpdateEvent {
        UpdateEvent::AlertGroupConfig { old, new }
    }
}

/// A stateful filter over the watch events of one kind.
pub trait EventFilter<K: Resource>: Send + Sync {
    /// Record `obj` and report whether it should trigger a reconcile.
    fn admit(&self, obj: &K) -> bool;

    /// Drop the history of an object that is gone.
    fn forget(&self, obj: &K);

    /// Keep only the history of `objs`, after the watch was re-listed.
    fn retain(&self, objs: &[K]);

    /// Objects of one watch event that should trigger a reconcile.
    fn filter_event(
        &self,
        event: Result<watcher::Event<K>, watcher::Error>,
    ) -> Vec<Result<K, watcher::Error>> {
        match event {
            Ok(watcher::Event::Applied(obj)) => {
                if self.admit(&obj) {
                    vec![Ok(obj)]
                } else {
                    Vec::new()
                }
            }
            Ok(watcher::Event::Deleted(obj)) => {
                self.forget(&obj);
                Vec::new()
            }
            Ok(watcher::Event::Restarted(objs)) => {
                self.retain(&objs);
                objs.into_iter().filter(|obj| self.admit(obj)).map(Ok).collect()
            }
            Err(e) => vec![Err(e)],
        }
    }
}

/// Turn a stream of watch events into the trigger stream of a controller.
pub fn filtered<K, S, F>(events: S, filter: Arc<F>) -> impl Stream<Item = Result<K, watcher::Error>>
where
    K: Resource,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    F: EventFilter<K>,
{
    events.flat_map(move |event| stream::iter(filter.filter_event(event)))
}

/// Per-key history shared by the filters.
struct LastSeen<K: Resource, V>
where
    K::DynamicType: Eq + Hash + Clone,
{
    entries: Mutex<HashMap<ObjectRef<K>, V>>,
}

impl<K: Resource, V> Default for LastSeen<K, V>
where
    K::DynamicType: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Resource, V> LastSeen<K, V>
where
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectRef<K>, V>> {
        // A poisoned map only loses history; the next event reconciles.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replace(&self, obj: &K, value: V) -> Option<V> {
        self.lock().insert(ObjectRef::from_obj(obj), value)
    }

    fn remove(&self, obj: &K) {
        self.lock().remove(&ObjectRef::from_obj(obj));
    }

    fn retain(&self, objs: &[K]) {
        let live: HashSet<ObjectRef<K>> = objs.iter().map(ObjectRef::from_obj).collect();
        self.lock().retain(|key, _| live.contains(key));
    }
}

/// Last observed copy of every object of one kind.
///
/// The watcher hands over only the current object, so the previous
/// observation is kept here to rebuild the update event. The first
/// observation of a key is a create and always reconciles.
pub struct ObservedObjects<K: Observed>
where
    K::DynamicType: Eq + Hash + Clone,
{
    last_seen: LastSeen<K, Arc<K>>,
}

impl<K: Observed> Default for ObservedObjects<K>
where
    K::DynamicType: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            last_seen: LastSeen::default(),
        }
    }
}

impl<K: Observed> ObservedObjects<K>
where
    K::DynamicType: Default + Eq + Hash + Clone,
{
    /// Record `current` and report whether it should be reconciled.
    pub fn observe(&self, current: &K) -> bool {
        let current = Arc::new(current.clone());
        match self.last_seen.replace(&current, current.clone()) {
            None => true,
            Some(previous) => {
                let decision = should_reconcile(&K::update_event(Some(previous), Some(current)));
                trace!(decision, "update predicate evaluated");
                decision
            }
        }
    }
}

impl<K: Observed + Send + Sync> EventFilter<K> for ObservedObjects<K>
where
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn admit(&self, obj: &K) -> bool {
        self.observe(obj)
    }

    fn forget(&self, obj: &K) {
        self.last_seen.remove(obj);
    }

    fn retain(&self, objs: &[K]) {
        self.last_seen.retain(objs);
    }
}

/// Lets through objects whose `metadata.generation` moved, that is spec
/// edits, and drops status and metadata-only updates.
pub struct GenerationTracker<K: Resource>
where
    K::DynamicType: Eq + Hash + Clone,
{
    generations: LastSeen<K, Option<i64>>,
}

impl<K: Resource> Default for GenerationTracker<K>
where
    K::DynamicType: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            generations: LastSeen::default(),
        }
    }
}

impl<K: Resource + Send + Sync> EventFilter<K> for GenerationTracker<K>
where
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn admit(&self, obj: &K) -> bool {
        let generation = obj.meta().generation;
        self.generations.replace(obj, generation) != Some(generation)
    }

    fn forget(&self, obj: &K) {
        self.generations.remove(obj);
    }

    fn retain(&self, objs: &[K]) {
        self.generations.retain(objs);
    }
}

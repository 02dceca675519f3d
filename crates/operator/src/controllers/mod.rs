pub mod alert_definition;
pub mod group_config;

pub use alert_definition::AlertDefinitionController;
pub use group_config::AlertGroupConfigController;

use std::sync::Arc;

use kube::api::Api;
use kube::{Client, Resource};

use crate::backend::AlertingClient;
use crate::config::RequeueConfig;
use crate::crd::FINALIZER;
use crate::status::StatusSynchronizer;
use crate::store::{EventSeverity, EventSink, ResourceRef, ResourceStore};

/// Collaborators shared by both controllers.
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub alerts: Arc<dyn AlertingClient>,
    pub status: StatusSynchronizer,
    pub requeue: RequeueConfig,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        alerts: Arc<dyn AlertingClient>,
        events: Arc<dyn EventSink>,
        requeue: RequeueConfig,
    ) -> Self {
        let status = StatusSynchronizer::new(store.clone(), events).with_patch_requeue(requeue.status_patch);
        Self {
            store,
            alerts,
            status,
            requeue,
        }
    }

    pub(crate) async fn warn(&self, target: &ResourceRef, reason: &str, message: &str) {
        self.status.emit(target, EventSeverity::Warning, reason, message).await;
    }

    pub(crate) async fn notify(&self, target: &ResourceRef, reason: &str, message: &str) {
        self.status.emit(target, EventSeverity::Normal, reason, message).await;
    }
}

pub(crate) fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|name| name == FINALIZER))
        .unwrap_or(false)
}

pub(crate) fn with_finalizer<K: Resource + Clone>(obj: &K) -> K {
    let mut updated = obj.clone();
    updated
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER.to_string());
    updated
}

pub(crate) fn without_finalizer<K: Resource + Clone>(obj: &K) -> K {
    let mut updated = obj.clone();
    if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
        finalizers.retain(|name| name != FINALIZER);
    }
    updated
}

pub(crate) fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::MockAlertingClient;
    use crate::store::{MockEventSink, MockResourceStore};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    pub type Patches = Arc<Mutex<Vec<(ResourceRef, Value)>>>;
    pub type Events = Arc<Mutex<Vec<(ResourceRef, EventSeverity, String)>>>;

    pub fn requeue() -> RequeueConfig {
        RequeueConfig {
            backend_error: Duration::from_secs(60),
            status_patch: Duration::from_secs(30),
            error_policy: Duration::from_secs(15),
        }
    }

    pub fn record_patches(store: &mut MockResourceStore, patches: Patches) {
        store.expect_patch_status().returning(move |target, patch| {
            patches.lock().unwrap().push((target.clone(), patch.clone()));
            Ok(())
        });
    }

    pub fn recording_events(events: Events) -> MockEventSink {
        let mut sink = MockEventSink::new();
        sink.expect_record_event().returning(move |target, severity, reason, _| {
            events.lock().unwrap().push((target.clone(), severity, reason.to_string()));
            Ok(())
        });
        sink
    }

    pub fn context(store: MockResourceStore, alerts: MockAlertingClient, events: MockEventSink) -> Context {
        Context::new(Arc::new(store), Arc::new(alerts), Arc::new(events), requeue())
    }
}

//! Collaborator seams: the resource store and the event sink.
//!
//! Controllers and the status synchronizer talk to Kubernetes only through
//! these traits so they can be exercised with mocks.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use serde_json::Value;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{AlertDefinition, AlertGroupConfig};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AlertDefinition,
    AlertGroupConfig,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::AlertDefinition => "AlertDefinition",
            ResourceKind::AlertGroupConfig => "AlertGroupConfig",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one object in the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
}

impl ResourceRef {
    pub fn definition(def: &AlertDefinition) -> Self {
        Self {
            kind: ResourceKind::AlertDefinition,
            namespace: def.namespace().unwrap_or_default(),
            name: def.name_any(),
            uid: def.uid(),
        }
    }

    pub fn group_config(config: &AlertGroupConfig) -> Self {
        Self {
            kind: ResourceKind::AlertGroupConfig,
            namespace: config.namespace().unwrap_or_default(),
            name: config.name_any(),
            uid: config.uid(),
        }
    }

    fn object_reference(&self) -> ObjectReference {
        let api_version = match self.kind {
            ResourceKind::AlertDefinition => AlertDefinition::api_version(&()).into_owned(),
            ResourceKind::AlertGroupConfig => AlertGroupConfig::api_version(&()).into_owned(),
        };
        ObjectReference {
            api_version: Some(api_version),
            kind: Some(self.kind.to_string()),
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            uid: self.uid.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// The authoritative object store holding both resource kinds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_definition(&self, namespace: &str, name: &str) -> Result<Option<AlertDefinition>>;

    async fn get_group_config(&self, namespace: &str, name: &str) -> Result<Option<AlertGroupConfig>>;

    /// Replace the whole object. Used for metadata and finalizer changes.
    async fn update_definition(&self, definition: &AlertDefinition) -> Result<AlertDefinition>;

    async fn update_group_config(&self, config: &AlertGroupConfig) -> Result<AlertGroupConfig>;

    /// Apply a JSON merge patch to the status subresource of `target`.
    async fn patch_status(&self, target: &ResourceRef, patch: &Value) -> Result<()>;
}

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_event(
        &self,
        target: &ResourceRef,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

pub struct KubeResourceStore {
    client: Client,
    field_manager: String,
}

impl KubeResourceStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn definitions(&self, namespace: &str) -> Api<AlertDefinition> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn group_configs(&self, namespace: &str) -> Api<AlertGroupConfig> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_definition(&self, namespace: &str, name: &str) -> Result<Option<AlertDefinition>> {
        Ok(self.definitions(namespace).get_opt(name).await?)
    }

    async fn get_group_config(&self, namespace: &str, name: &str) -> Result<Option<AlertGroupConfig>> {
        Ok(self.group_configs(namespace).get_opt(name).await?)
    }

    async fn update_definition(&self, definition: &AlertDefinition) -> Result<AlertDefinition> {
        let namespace = definition.namespace().unwrap_or_default();
        Ok(self
            .definitions(&namespace)
            .replace(&definition.name_any(), &self.post_params(), definition)
            .await?)
    }

    async fn update_group_config(&self, config: &AlertGroupConfig) -> Result<AlertGroupConfig> {
        let namespace = config.namespace().unwrap_or_default();
        Ok(self
            .group_configs(&namespace)
            .replace(&config.name_any(), &self.post_params(), config)
            .await?)
    }

    async fn patch_status(&self, target: &ResourceRef, patch: &Value) -> Result<()> {
        let params = merge_patch_params(&self.field_manager);
        match target.kind {
            ResourceKind::AlertDefinition => {
                self.definitions(&target.namespace)
                    .patch_status(&target.name, &params, &Patch::Merge(patch))
                    .await?;
            }
            ResourceKind::AlertGroupConfig => {
                self.group_configs(&target.namespace)
                    .patch_status(&target.name, &params, &Patch::Merge(patch))
                    .await?;
            }
        }
        debug!(%target, "status patched");
        Ok(())
    }
}

/// Params for a JSON merge patch; `PatchParams::apply` is reserved for
/// server-side apply.
fn merge_patch_params(field_manager: &str) -> PatchParams {
    PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    }
}

/// Publishes Kubernetes events through the kube-runtime recorder.
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: impl Into<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record_event(
        &self,
        target: &ResourceRef,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), target.object_reference());
        let type_ = match severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        recorder
            .publish(Event {
                type_,
                reason: reason.to_string(),
                note: Some(message.to_string()),
                action: "Reconcile".to_string(),
                secondary: None,
            })
            .await
            .map_err(|e| {
                warn!(%target, error = %e, "failed to publish event");
                Error::Kubernetes(e)
            })
    }
}

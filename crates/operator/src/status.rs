//! Status synchronization between an alert definition and a group config.
//!
//! Every alert instantiated by a group config is tracked twice: under the
//! config's status keyed by the definition name, and under the definition's
//! status keyed by the config name. Both entries are written with JSON merge
//! patches so writers touching other keys of `alertsStatus` are left alone.
//! The two patches are not atomic: the config is patched first and a failure
//! there skips the definition patch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::crd::{AlertDefinition, AlertGroupConfig, AlertStatus, State};
use crate::metrics;
use crate::store::{EventSeverity, EventSink, ResourceRef, ResourceStore};
use crate::{Error, Result};

/// Backoff after a failed status patch.
pub const STATUS_PATCH_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue delay for a successfully recorded `Error` state when the caller
/// does not supply one: retry immediately.
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::ZERO;

/// Retry count to record next to `state`: failures count as another attempt.
pub fn next_retry_count(current: i32, state: State) -> i32 {
    if state.is_failure() {
        current.saturating_add(1)
    } else {
        current
    }
}

/// Merge patch setting the resource-level state and one `alertsStatus` entry.
pub fn alert_status_patch(state: State, retry_count: i32, peer_name: &str, status: &AlertStatus) -> Value {
    json!({
        "status": {
            "state": state,
            "retryCount": retry_count,
            "errorDescription": status.error_description,
            "alertsStatus": {
                peer_name: status,
            },
        }
    })
}

/// Merge patch dropping one `alertsStatus` entry.
pub fn remove_alert_status_patch(peer_name: &str) -> Value {
    json!({
        "status": {
            "alertsStatus": {
                peer_name: Value::Null,
            },
        }
    })
}

/// Outcome of a standalone definition's reconciliation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefinitionOutcome {
    pub state: State,
    pub error_description: String,
    pub alert_id: Option<String>,
}

pub struct StatusSynchronizer {
    store: Arc<dyn ResourceStore>,
    events: Arc<dyn EventSink>,
    patch_requeue: Duration,
}

impl StatusSynchronizer {
    pub fn new(store: Arc<dyn ResourceStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            patch_requeue: STATUS_PATCH_REQUEUE,
        }
    }

    pub fn with_patch_requeue(mut self, delay: Duration) -> Self {
        self.patch_requeue = delay;
        self
    }

    /// Record `status` for the alert `definition` instantiated by `config` in
    /// both resources.
    #[instrument(skip_all, fields(definition = %definition.name_any(), config = %config.name_any(), state = %state))]
    pub async fn sync_both(
        &self,
        state: State,
        definition: &AlertDefinition,
        config: &AlertGroupConfig,
        mut status: AlertStatus,
        requeue_delay: Option<Duration>,
    ) -> Result<Action> {
        status.last_updated_timestamp = Some(Utc::now().to_rfc3339());

        let definition_ref = ResourceRef::definition(definition);
        let config_ref = ResourceRef::group_config(config);

        let config_retries = config.status.as_ref().map(|s| s.retry_count).unwrap_or(0);
        let config_patch = alert_status_patch(
            state,
            next_retry_count(config_retries, state),
            &definition_ref.name,
            &status,
        );
        if let Err(e) = self
            .patch_status(&config_ref, &definition_ref, &config_patch, state, requeue_delay)
            .await
        {
            error!(error = %e, "unable to patch the status of the alert group config");
            return Err(e);
        }

        let definition_retries = definition.status.as_ref().map(|s| s.retry_count).unwrap_or(0);
        let definition_patch = alert_status_patch(
            state,
            next_retry_count(definition_retries, state),
            &config_ref.name,
            &status,
        );
        let action = match self
            .patch_status(&definition_ref, &definition_ref, &definition_patch, state, requeue_delay)
            .await
        {
            Ok(action) => action,
            Err(e) => {
                error!(error = %e, "unable to patch the status of the alert definition");
                return Err(e);
            }
        };

        info!("alert status synchronized for both alert definition and group config");
        self.emit(
            &definition_ref,
            EventSeverity::Normal,
            "Successful",
            &format!("successfully created/updated an alert name = {}", status.name),
        )
        .await;

        Ok(action)
    }

    /// Record the group-config-only entry for a definition that could not be
    /// loaded.
    pub async fn sync_config_entry(
        &self,
        config: &AlertGroupConfig,
        definition_name: &str,
        mut status: AlertStatus,
        requeue_delay: Option<Duration>,
    ) -> Result<Action> {
        status.last_updated_timestamp = Some(Utc::now().to_rfc3339());
        let config_ref = ResourceRef::group_config(config);
        let retries = config.status.as_ref().map(|s| s.retry_count).unwrap_or(0);
        let patch = alert_status_patch(status.state, next_retry_count(retries, status.state), definition_name, &status);
        self.patch_status(&config_ref, &config_ref, &patch, status.state, requeue_delay)
            .await
    }

    /// Record the outcome of a standalone definition.
    pub async fn sync_definition(
        &self,
        definition: &AlertDefinition,
        outcome: DefinitionOutcome,
        requeue_delay: Option<Duration>,
    ) -> Result<Action> {
        let target = ResourceRef::definition(definition);
        let current = definition.status.clone().unwrap_or_default();

        let patch = json!({
            "status": {
                "state": outcome.state,
                "retryCount": next_retry_count(current.retry_count, outcome.state),
                "errorDescription": outcome.error_description,
                "lastUpdatedTimestamp": Utc::now().to_rfc3339(),
                "alertID": outcome.alert_id.or(current.alert_id),
            }
        });
        self.patch_status(&target, &target, &patch, outcome.state, requeue_delay)
            .await
    }

    /// Drop the entry `peer_name` from the `alertsStatus` of `target`.
    pub async fn remove_entry(&self, target: &ResourceRef, peer_name: &str) -> Result<()> {
        self.patch_status(target, target, &remove_alert_status_patch(peer_name), State::Deleting, None)
            .await
            .map(|_| ())
    }

    /// Apply one merge patch. A failed patch is reported on `event_target`
    /// and asks for a fixed backoff; a recorded `Error` state asks for
    /// `requeue_delay`.
    async fn patch_status(
        &self,
        target: &ResourceRef,
        event_target: &ResourceRef,
        patch: &Value,
        state: State,
        requeue_delay: Option<Duration>,
    ) -> Result<Action> {
        if let Err(e) = self.store.patch_status(target, patch).await {
            error!(%target, %state, error = %e, "unable to patch the status");
            metrics::record_status_patch_failure(target.kind.as_str());
            self.emit(
                event_target,
                EventSeverity::Warning,
                "Error",
                &format!("Unable to patch status of {} due to error {}", target, e),
            )
            .await;
            return Err(Error::TransientStore {
                message: format!("status patch of {} failed: {}", target, e),
                requeue_after: self.patch_requeue,
            });
        }

        if state != State::Error {
            return Ok(Action::await_change());
        }

        let delay = requeue_delay.unwrap_or(DEFAULT_ERROR_REQUEUE);
        info!(%target, ?delay, "requeueing after error state");
        Ok(Action::requeue(delay))
    }

    pub(crate) async fn emit(&self, target: &ResourceRef, severity: EventSeverity, reason: &str, message: &str) {
        if let Err(e) = self.events.record_event(target, severity, reason, message).await {
            warn!(%target, error = %e, "unable to record event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AlertDefinitionSpec, AlertDefinitionStatus, AlertGroupConfigSpec, AlertGroupConfigStatus,
    };
    use crate::store::{MockEventSink, MockResourceStore, ResourceKind};
    use std::sync::Mutex;

    fn definition() -> AlertDefinition {
        let mut def = AlertDefinition::new(
            "cpu-high",
            AlertDefinitionSpec {
                exported_params: vec!["env".into()],
                ..Default::default()
            },
        );
        def.metadata.namespace = Some("monitoring".into());
        def.status = Some(AlertDefinitionStatus {
            retry_count: 2,
            ..Default::default()
        });
        def
    }

    fn config() -> AlertGroupConfig {
        let mut cfg = AlertGroupConfig::new("team-a", AlertGroupConfigSpec::default());
        cfg.metadata.namespace = Some("monitoring".into());
        cfg.status = Some(AlertGroupConfigStatus {
            retry_count: 1,
            ..Default::default()
        });
        cfg
    }

    type Patches = Arc<Mutex<Vec<(ResourceRef, Value)>>>;

    fn recording_store(patches: Patches, fail_kind: Option<ResourceKind>) -> MockResourceStore {
        let mut store = MockResourceStore::new();
        store.expect_patch_status().returning(move |target, patch| {
            if Some(target.kind) == fail_kind {
                return Err(Error::Backend("conflict".into()));
            }
            patches.lock().unwrap().push((target.clone(), patch.clone()));
            Ok(())
        });
        store
    }

    type Events = Arc<Mutex<Vec<(ResourceRef, EventSeverity, String)>>>;

    fn recording_events(events: Events) -> MockEventSink {
        let mut sink = MockEventSink::new();
        sink.expect_record_event().returning(move |target, severity, reason, _| {
            events.lock().unwrap().push((target.clone(), severity, reason.to_string()));
            Ok(())
        });
        sink
    }

    #[test]
    fn retry_count_increments_only_on_failure() {
        assert_eq!(next_retry_count(3, State::Ready), 3);
        assert_eq!(next_retry_count(3, State::Error), 4);
        assert_eq!(next_retry_count(3, State::MalformedSpec), 4);
        assert_eq!(next_retry_count(i32::MAX, State::Error), i32::MAX);
    }

    #[test]
    fn patch_document_shape() {
        let status = AlertStatus::ready("cpu-high-prod", "42");
        let patch = alert_status_patch(State::Ready, 1, "cpu-high", &status);
        assert_eq!(
            patch,
            json!({
                "status": {
                    "state": "Ready",
                    "retryCount": 1,
                    "errorDescription": "",
                    "alertsStatus": {
                        "cpu-high": {
                            "name": "cpu-high-prod",
                            "id": "42",
                            "state": "Ready",
                            "lastUpdatedTimestamp": null,
                            "errorDescription": ""
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn merge_patch_is_idempotent_and_keeps_sibling_entries() {
        let mut resource = json!({
            "status": {
                "state": "Error",
                "retryCount": 1,
                "alertsStatus": {
                    "other-config": {"name": "other", "state": "Ready"}
                }
            }
        });
        let status = AlertStatus {
            last_updated_timestamp: Some("2024-05-01T10:00:00+00:00".into()),
            ..AlertStatus::ready("cpu-high-prod", "42")
        };
        let patch = alert_status_patch(State::Ready, 1, "team-a", &status);

        json_patch::merge(&mut resource, &patch);
        let once = resource.clone();
        json_patch::merge(&mut resource, &patch);

        assert_eq!(resource, once);
        assert_eq!(resource["status"]["alertsStatus"]["other-config"]["state"], "Ready");
        assert_eq!(resource["status"]["alertsStatus"]["team-a"]["id"], "42");
    }

    #[test]
    fn recovered_entry_overwrites_previous_failure() {
        let mut resource = json!({});
        let failed = AlertStatus {
            id: Some("41".into()),
            ..AlertStatus::failed("cpu-high-prod", State::MalformedSpec, "missing param env")
        };
        json_patch::merge(
            &mut resource,
            &alert_status_patch(State::MalformedSpec, 1, "team-a", &failed),
        );

        let ready = AlertStatus::ready("cpu-high-prod", "42");
        json_patch::merge(&mut resource, &alert_status_patch(State::Ready, 1, "team-a", &ready));

        let stored: AlertStatus =
            serde_json::from_value(resource["status"]["alertsStatus"]["team-a"].clone()).unwrap();
        assert_eq!(stored, ready);
        assert_eq!(resource["status"]["errorDescription"], "");

        // A failure without an id clears the stale one.
        let failed = AlertStatus::failed("cpu-high-prod", State::Error, "backend down");
        json_patch::merge(&mut resource, &alert_status_patch(State::Error, 2, "team-a", &failed));
        let stored: AlertStatus =
            serde_json::from_value(resource["status"]["alertsStatus"]["team-a"].clone()).unwrap();
        assert_eq!(stored, failed);
        assert!(resource["status"]["alertsStatus"]["team-a"].get("id").is_none());
    }

    #[test]
    fn removal_patch_drops_only_the_named_entry() {
        let mut resource = json!({
            "status": {"alertsStatus": {"team-a": {"name": "a"}, "team-b": {"name": "b"}}}
        });
        json_patch::merge(&mut resource, &remove_alert_status_patch("team-a"));
        assert_eq!(resource, json!({"status": {"alertsStatus": {"team-b": {"name": "b"}}}}));
    }

    #[tokio::test]
    async fn sync_both_patches_config_then_definition_with_equal_entries() {
        let patches: Patches = Default::default();
        let events: Events = Default::default();
        let sync = StatusSynchronizer::new(
            Arc::new(recording_store(patches.clone(), None)),
            Arc::new(recording_events(events.clone())),
        );

        let action = sync
            .sync_both(State::Ready, &definition(), &config(), AlertStatus::ready("cpu-high-prod", "42"), None)
            .await;
        tokio_test::assert_ok!(&action);
        assert_eq!(action.unwrap(), Action::await_change());

        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 2);
        let (config_target, config_patch) = &patches[0];
        let (definition_target, definition_patch) = &patches[1];
        assert_eq!(config_target.kind, ResourceKind::AlertGroupConfig);
        assert_eq!(definition_target.kind, ResourceKind::AlertDefinition);

        let config_entry = &config_patch["status"]["alertsStatus"]["cpu-high"];
        let definition_entry = &definition_patch["status"]["alertsStatus"]["team-a"];
        assert_eq!(config_entry, definition_entry);
        assert!(config_entry["lastUpdatedTimestamp"].is_string());

        assert_eq!(config_patch["status"]["retryCount"], 1);
        assert_eq!(definition_patch["status"]["retryCount"], 2);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, EventSeverity::Normal);
        assert_eq!(events[0].0.kind, ResourceKind::AlertDefinition);
    }

    #[tokio::test]
    async fn config_patch_failure_skips_definition_patch() {
        let patches: Patches = Default::default();
        let events: Events = Default::default();
        let sync = StatusSynchronizer::new(
            Arc::new(recording_store(patches.clone(), Some(ResourceKind::AlertGroupConfig))),
            Arc::new(recording_events(events.clone())),
        );

        let err = sync
            .sync_both(State::Ready, &definition(), &config(), AlertStatus::ready("cpu-high-prod", "42"), None)
            .await
            .unwrap_err();

        assert_eq!(err.requeue_after(), Some(STATUS_PATCH_REQUEUE));
        assert!(patches.lock().unwrap().is_empty());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0.kind, ResourceKind::AlertDefinition);
        assert_eq!(events[0].1, EventSeverity::Warning);
    }

    #[tokio::test]
    async fn error_state_requeues_with_supplied_or_default_delay() {
        let sync = StatusSynchronizer::new(
            Arc::new(recording_store(Default::default(), None)),
            Arc::new(recording_events(Default::default())),
        );
        let failed = AlertStatus::failed("cpu-high", State::Error, "backend down");

        let action = sync
            .sync_both(State::Error, &definition(), &config(), failed.clone(), Some(Duration::from_secs(90)))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(90)));

        let action = sync
            .sync_both(State::Error, &definition(), &config(), failed, None)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(DEFAULT_ERROR_REQUEUE));
    }

    #[tokio::test]
    async fn failure_increments_retry_and_records_error_description() {
        let patches: Patches = Default::default();
        let sync = StatusSynchronizer::new(
            Arc::new(recording_store(patches.clone(), None)),
            Arc::new(recording_events(Default::default())),
        );

        sync.sync_both(
            State::MalformedSpec,
            &definition(),
            &config(),
            AlertStatus::failed("cpu-high", State::MalformedSpec, "missing param env"),
            None,
        )
        .await
        .unwrap();

        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].1["status"]["retryCount"], 2);
        assert_eq!(patches[1].1["status"]["retryCount"], 3);
        assert_eq!(patches[1].1["status"]["errorDescription"], "missing param env");
    }

    #[tokio::test]
    async fn definition_outcome_keeps_previous_alert_id() {
        let patches: Patches = Default::default();
        let sync = StatusSynchronizer::new(
            Arc::new(recording_store(patches.clone(), None)),
            Arc::new(recording_events(Default::default())),
        )
        .with_patch_requeue(Duration::from_secs(5));

        let mut def = definition();
        if let Some(status) = def.status.as_mut() {
            status.alert_id = Some("7".into());
        }

        sync.sync_definition(
            &def,
            DefinitionOutcome {
                state: State::Error,
                error_description: "backend down".into(),
                alert_id: None,
            },
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap();

        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].1["status"]["alertID"], "7");
        assert_eq!(patches[0].1["status"]["retryCount"], 3);
    }
}

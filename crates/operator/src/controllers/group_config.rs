use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        reflector::{reflector, store, ObjectRef},
        watcher::{watcher, Config as WatcherConfig},
        WatchStreamExt,
    },
    Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use super::{has_finalizer, scoped_api, with_finalizer, without_finalizer, Context};
use crate::{
    backend::AlertRequest,
    builder::build_alert_request,
    crd::{AlertDefinition, AlertGroupConfig, AlertReference, AlertStatus, State},
    metrics,
    params::merge_params,
    predicate::{self, GenerationTracker, ObservedObjects},
    store::{ResourceKind, ResourceRef},
    Error, Result,
};

pub struct AlertGroupConfigController {
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
}

impl AlertGroupConfigController {
    pub fn new(client: Client, namespace: Option<String>, ctx: Arc<Context>) -> Self {
        Self {
            client,
            namespace,
            ctx,
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!("Starting AlertGroupConfig controller");

        let configs = scoped_api::<AlertGroupConfig>(self.client.clone(), self.namespace.as_deref());
        let definitions = scoped_api::<AlertDefinition>(self.client.clone(), self.namespace.as_deref());

        let (reader, writer) = store();
        let events = reflector(writer, watcher(configs, WatcherConfig::default()).default_backoff());
        let triggers = predicate::filtered(events, Arc::new(ObservedObjects::<AlertGroupConfig>::default()));

        // Only spec edits of a definition fan out to the configs using it;
        // its status is written by this controller.
        let definition_edits = predicate::filtered(
            watcher(definitions, WatcherConfig::default()).default_backoff(),
            Arc::new(GenerationTracker::<AlertDefinition>::default()),
        );

        Controller::for_stream(triggers, reader)
            .watches_stream(definition_edits, |definition: AlertDefinition| referencing_configs(&definition))
            .shutdown_on_signal()
            .run(Self::reconcile, Self::error_policy, self)
            .for_each(|res| async move {
                match res {
                    Ok((_config, _action)) => {}
                    Err(e) => error!("Reconciliation error: {}", e),
                }
            })
            .await;
    }

    async fn reconcile(config: Arc<AlertGroupConfig>, ctrl: Arc<Self>) -> Result<Action> {
        reconcile_group_config(&ctrl.ctx, &config).await
    }

    fn error_policy(config: Arc<AlertGroupConfig>, err: &Error, ctrl: Arc<Self>) -> Action {
        error!("Error processing AlertGroupConfig {}: {}", config.name_any(), err);
        metrics::record_reconciliation(ResourceKind::AlertGroupConfig.as_str(), "error");
        Action::requeue(err.requeue_after().unwrap_or(ctrl.ctx.requeue.error_policy))
    }
}

/// Group configs recorded in a definition's status.
fn referencing_configs(definition: &AlertDefinition) -> Vec<ObjectRef<AlertGroupConfig>> {
    let namespace = definition.namespace().unwrap_or_default();
    definition
        .status
        .as_ref()
        .map(|status| {
            status
                .alerts_status
                .keys()
                .map(|name| ObjectRef::new(name).within(&namespace))
                .collect()
        })
        .unwrap_or_default()
}

/// Reconcile every alert a group config instantiates.
#[instrument(skip_all, fields(kind = "AlertGroupConfig", name = %config.name_any(), namespace = %config.namespace().unwrap_or_default()))]
pub async fn reconcile_group_config(ctx: &Context, config: &AlertGroupConfig) -> Result<Action> {
    if config.metadata.deletion_timestamp.is_some() {
        return cleanup_group_config(ctx, config).await;
    }

    if !has_finalizer(config) {
        ctx.store.update_group_config(&with_finalizer(config)).await?;
        info!("added finalizer");
        return Ok(Action::await_change());
    }

    let mut requeue: Option<Duration> = None;
    let mut first_error: Option<Error> = None;

    for reference in &config.spec.alerts {
        match reconcile_alert(ctx, config, reference).await {
            Ok(Some(delay)) => requeue = Some(requeue.map_or(delay, |d| d.min(delay))),
            Ok(None) => {}
            Err(e) => {
                error!(definition = %reference.alert_definition_name, error = %e, "unable to reconcile alert");
                first_error.get_or_insert(e);
            }
        }
    }

    if let Err(e) = prune_removed_alerts(ctx, config).await {
        first_error.get_or_insert(e);
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(match requeue {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

/// Instantiate one referenced definition. Returns the requeue delay the
/// recorded outcome asks for.
async fn reconcile_alert(
    ctx: &Context,
    config: &AlertGroupConfig,
    reference: &AlertReference,
) -> Result<Option<Duration>> {
    let namespace = config.namespace().unwrap_or_default();
    let definition_name = reference.alert_definition_name.as_str();
    let config_ref = ResourceRef::group_config(config);

    let Some(definition) = ctx.store.get_definition(&namespace, definition_name).await? else {
        let message = format!("alert definition {} not found", definition_name);
        warn!("{}", message);
        ctx.warn(&config_ref, "NotFound", &message).await;
        let delay = ctx.requeue.backend_error;
        ctx.status
            .sync_config_entry(
                config,
                definition_name,
                AlertStatus::failed(definition_name, State::Error, message),
                Some(delay),
            )
            .await?;
        return Ok(Some(delay));
    };

    let existing_id = config
        .status
        .as_ref()
        .and_then(|s| s.alerts_status.get(definition_name))
        .and_then(|s| s.id.clone());

    if definition.spec.is_standalone() {
        // Recorded on the config only: the definition keeps its own alert.
        let message = format!(
            "alert definition {} exports no params and cannot be used by an alert group config",
            definition_name
        );
        warn!("{}", message);
        ctx.warn(&config_ref, "MalformedSpec", &message).await;
        metrics::record_reconciliation(ResourceKind::AlertGroupConfig.as_str(), "malformed");
        let status = AlertStatus {
            id: existing_id,
            ..AlertStatus::failed(definition_name, State::MalformedSpec, message)
        };
        ctx.status
            .sync_config_entry(config, definition_name, status, None)
            .await?;
        return Ok(None);
    }

    let params = merge_params(&config.spec.global_params, &reference.params);

    let request: AlertRequest = match build_alert_request(&definition.spec, &params) {
        Ok(request) => request,
        Err(e) if e.is_malformed_spec() || matches!(e, Error::Serialization(_)) => {
            let message = format!("unable to process alert template, will not be retried: {}", e);
            warn!("{}", message);
            ctx.warn(&ResourceRef::definition(&definition), "MalformedSpec", &message).await;
            metrics::record_reconciliation(ResourceKind::AlertGroupConfig.as_str(), "malformed");
            let status = AlertStatus {
                id: existing_id,
                ..AlertStatus::failed(definition_name, State::MalformedSpec, message)
            };
            ctx.status
                .sync_both(State::MalformedSpec, &definition, config, status, None)
                .await?;
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match ctx.alerts.create_or_update_alert(&request, existing_id.clone()).await {
        Ok(id) => {
            info!(alert = %request.name, %id, "alert created/updated");
            ctx.status
                .sync_both(State::Ready, &definition, config, AlertStatus::ready(&request.name, id), None)
                .await?;
            metrics::record_reconciliation(ResourceKind::AlertGroupConfig.as_str(), "ready");
            Ok(None)
        }
        Err(e) => {
            let message = format!("unable to create/update the alert in the backend: {}", e);
            error!("{}", message);
            ctx.warn(&ResourceRef::definition(&definition), "Error", &message).await;
            metrics::record_reconciliation(ResourceKind::AlertGroupConfig.as_str(), "backend_error");
            let delay = ctx.requeue.backend_error;
            let status = AlertStatus {
                id: existing_id,
                ..AlertStatus::failed(&request.name, State::Error, message)
            };
            ctx.status
                .sync_both(State::Error, &definition, config, status, Some(delay))
                .await?;
            Ok(Some(delay))
        }
    }
}

/// Delete alerts whose definition was dropped from the config's spec.
async fn prune_removed_alerts(ctx: &Context, config: &AlertGroupConfig) -> Result<()> {
    let wanted: BTreeSet<&str> = config
        .spec
        .alerts
        .iter()
        .map(|r| r.alert_definition_name.as_str())
        .collect();
    let Some(status) = config.status.as_ref() else {
        return Ok(());
    };

    for (definition_name, alert) in &status.alerts_status {
        if wanted.contains(definition_name.as_str()) {
            continue;
        }
        info!(definition = %definition_name, "alert removed from config, cleaning up");
        release_alert(ctx, config, definition_name, alert).await?;
        ctx.status
            .remove_entry(&ResourceRef::group_config(config), definition_name)
            .await?;
    }
    Ok(())
}

/// Delete the backend alert and the definition-side entry of one alert.
async fn release_alert(
    ctx: &Context,
    config: &AlertGroupConfig,
    definition_name: &str,
    alert: &AlertStatus,
) -> Result<()> {
    if let Some(id) = alert.id.as_deref() {
        ctx.alerts.delete_alert(id).await?;
        info!(%id, alert = %alert.name, "alert deleted from backend");
    }

    let namespace = config.namespace().unwrap_or_default();
    if let Some(definition) = ctx.store.get_definition(&namespace, definition_name).await? {
        ctx.status
            .remove_entry(&ResourceRef::definition(&definition), &config.name_any())
            .await?;
    }
    Ok(())
}

async fn cleanup_group_config(ctx: &Context, config: &AlertGroupConfig) -> Result<Action> {
    if !has_finalizer(config) {
        return Ok(Action::await_change());
    }

    if let Some(status) = config.status.as_ref() {
        for (definition_name, alert) in &status.alerts_status {
            release_alert(ctx, config, definition_name, alert).await?;
        }
    }

    ctx.store.update_group_config(&without_finalizer(config)).await?;
    info!("removed finalizer");
    ctx.notify(
        &ResourceRef::group_config(config),
        "Deleted",
        "all alerts of the group config were deleted",
    )
    .await;
    metrics::record_reconciliation(ResourceKind::AlertGroupConfig.as_str(), "deleted");
    Ok(Action::await_change())
}

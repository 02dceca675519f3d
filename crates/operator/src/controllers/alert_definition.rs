use std::sync::Arc;

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        reflector::{reflector, store},
        watcher::{watcher, Config as WatcherConfig},
        WatchStreamExt,
    },
    Client, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::{has_finalizer, scoped_api, with_finalizer, without_finalizer, Context};
use crate::{
    builder::build_alert_request,
    crd::{AlertDefinition, State},
    metrics,
    params::Params,
    predicate::{self, ObservedObjects},
    status::DefinitionOutcome,
    store::{ResourceKind, ResourceRef},
    Error, Result,
};

pub struct AlertDefinitionController {
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
}

impl AlertDefinitionController {
    pub fn new(client: Client, namespace: Option<String>, ctx: Arc<Context>) -> Self {
        Self {
            client,
            namespace,
            ctx,
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!("Starting AlertDefinition controller");

        let definitions = scoped_api::<AlertDefinition>(self.client.clone(), self.namespace.as_deref());
        let (reader, writer) = store();
        let events = reflector(writer, watcher(definitions, WatcherConfig::default()).default_backoff());
        let triggers = predicate::filtered(events, Arc::new(ObservedObjects::<AlertDefinition>::default()));

        Controller::for_stream(triggers, reader)
            .shutdown_on_signal()
            .run(Self::reconcile, Self::error_policy, self)
            .for_each(|res| async move {
                match res {
                    Ok((_definition, _action)) => {}
                    Err(e) => error!("Reconciliation error: {}", e),
                }
            })
            .await;
    }

    async fn reconcile(definition: Arc<AlertDefinition>, ctrl: Arc<Self>) -> Result<Action> {
        reconcile_definition(&ctrl.ctx, &definition).await
    }

    fn error_policy(definition: Arc<AlertDefinition>, err: &Error, ctrl: Arc<Self>) -> Action {
        error!("Error processing AlertDefinition {}: {}", definition.name_any(), err);
        metrics::record_reconciliation(ResourceKind::AlertDefinition.as_str(), "error");
        Action::requeue(err.requeue_after().unwrap_or(ctrl.ctx.requeue.error_policy))
    }
}

/// Reconcile one alert definition against the backend.
#[instrument(skip_all, fields(kind = "AlertDefinition", name = %definition.name_any(), namespace = %definition.namespace().unwrap_or_default()))]
pub async fn reconcile_definition(ctx: &Context, definition: &AlertDefinition) -> Result<Action> {
    if definition.metadata.deletion_timestamp.is_some() {
        return cleanup_definition(ctx, definition).await;
    }

    if !has_finalizer(definition) {
        ctx.store.update_definition(&with_finalizer(definition)).await?;
        info!("added finalizer");
        // The metadata update comes back as an event and drives the next pass.
        return Ok(Action::await_change());
    }

    if !definition.spec.is_standalone() {
        return reconcile_template(ctx, definition).await;
    }

    let target = ResourceRef::definition(definition);
    let request = match build_alert_request(&definition.spec, &Params::new()) {
        Ok(request) => request,
        Err(e) if e.is_malformed_spec() || matches!(e, Error::Serialization(_)) => {
            let message = format!("unable to convert the alert spec to a backend request, will not be retried: {}", e);
            warn!("{}", message);
            ctx.warn(&target, "MalformedSpec", &message).await;
            metrics::record_reconciliation(ResourceKind::AlertDefinition.as_str(), "malformed");
            return ctx
                .status
                .sync_definition(
                    definition,
                    DefinitionOutcome {
                        state: State::MalformedSpec,
                        error_description: message,
                        alert_id: None,
                    },
                    None,
                )
                .await;
        }
        Err(e) => return Err(e),
    };

    let existing_id = definition.status.as_ref().and_then(|s| s.alert_id.clone());
    match ctx.alerts.create_or_update_alert(&request, existing_id).await {
        Ok(id) => {
            info!(alert = %request.name, %id, "alert created/updated");
            let action = ctx
                .status
                .sync_definition(
                    definition,
                    DefinitionOutcome {
                        state: State::Ready,
                        error_description: String::new(),
                        alert_id: Some(id),
                    },
                    None,
                )
                .await?;
            ctx.notify(
                &target,
                "Successful",
                &format!("successfully created/updated an alert name = {}", request.name),
            )
            .await;
            metrics::record_reconciliation(ResourceKind::AlertDefinition.as_str(), "ready");
            Ok(action)
        }
        Err(e) => {
            let message = format!("unable to create/update the alert in the backend: {}", e);
            error!("{}", message);
            ctx.warn(&target, "Error", &message).await;
            metrics::record_reconciliation(ResourceKind::AlertDefinition.as_str(), "backend_error");
            ctx.status
                .sync_definition(
                    definition,
                    DefinitionOutcome {
                        state: State::Error,
                        error_description: message,
                        alert_id: None,
                    },
                    Some(ctx.requeue.backend_error),
                )
                .await
        }
    }
}

/// Definitions exporting parameters are only instantiated through group
/// configs; here they are checked and marked ready.
async fn reconcile_template(ctx: &Context, definition: &AlertDefinition) -> Result<Action> {
    let undeclared: Vec<&String> = definition
        .spec
        .exported_params_default_values
        .keys()
        .filter(|name| !definition.spec.exported_params.contains(name))
        .collect();

    let current = definition.status.as_ref();
    let outcome = if undeclared.is_empty() {
        DefinitionOutcome {
            state: State::Ready,
            ..Default::default()
        }
    } else {
        let message = format!("default values given for undeclared exported params {:?}", undeclared);
        ctx.warn(&ResourceRef::definition(definition), "MalformedSpec", &message).await;
        DefinitionOutcome {
            state: State::MalformedSpec,
            error_description: message,
            alert_id: None,
        }
    };

    let unchanged = current
        .map(|s| s.state == outcome.state && s.error_description == outcome.error_description)
        .unwrap_or(false);
    if unchanged {
        debug!("template definition already up to date");
        return Ok(Action::await_change());
    }

    metrics::record_reconciliation(ResourceKind::AlertDefinition.as_str(), "template");
    ctx.status.sync_definition(definition, outcome, None).await
}

async fn cleanup_definition(ctx: &Context, definition: &AlertDefinition) -> Result<Action> {
    if !has_finalizer(definition) {
        return Ok(Action::await_change());
    }

    let target = ResourceRef::definition(definition);
    let status = definition.status.clone().unwrap_or_default();

    if !status.alerts_status.is_empty() {
        let configs: Vec<&String> = status.alerts_status.keys().collect();
        let message = format!("alert definition is still used by alert group configs {:?}", configs);
        warn!("{}", message);
        ctx.warn(&target, "InUse", &message).await;
        return Ok(Action::requeue(ctx.requeue.error_policy));
    }

    if let Some(id) = status.alert_id.as_deref() {
        ctx.alerts.delete_alert(id).await?;
        info!(%id, "alert deleted from backend");
    }

    ctx.store.update_definition(&without_finalizer(definition)).await?;
    info!("removed finalizer");
    metrics::record_reconciliation(ResourceKind::AlertDefinition.as_str(), "deleted");
    Ok(Action::await_change())
}

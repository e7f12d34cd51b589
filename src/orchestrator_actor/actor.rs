//! # Orchestrator Actor
//!
//! Owns every piece of mutable orchestration state for one environment and
//! processes one [`OrchestratorRequest`] at a time. Status notifications arrive
//! through the same inbox as commands, so a notification is never applied while
//! a command is halfway through.

use super::{EventBus, OrchestratorContext, OrchestratorError, OrchestratorRequest, SubscriptionRegistry};
use crate::clients::{ChannelPayload, DevMachine, HandlerKind, SubscriptionHandler};
use crate::config::OrchestratorConfig;
use crate::model::{
    ChannelId, EnvironmentEvent, Machine, MachineAction, MachineConfig, MachineHandle, MachineId,
    MachineStateEvent, MachineStatus, OperationStatus, OperationType, OutputLine, ProgressEvent,
    StatusNotification, WorkspaceId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct OrchestratorActor {
    receiver: mpsc::Receiver<OrchestratorRequest>,
    workspace_id: WorkspaceId,
    config: Arc<OrchestratorConfig>,
    machines: HashMap<MachineHandle, Machine>,
    /// Machines still tracked by backend id. A machine leaves this map on DESTROYED.
    by_id: HashMap<MachineId, MachineHandle>,
    subscriptions: SubscriptionRegistry,
    pending_restarts: HashSet<MachineId>,
    events: EventBus,
    status_handler: SubscriptionHandler,
    output_handler: SubscriptionHandler,
    next_handle: u32,
}

impl OrchestratorActor {
    pub(crate) fn new(
        workspace_id: WorkspaceId,
        config: Arc<OrchestratorConfig>,
        sender: &mpsc::Sender<OrchestratorRequest>,
        receiver: mpsc::Receiver<OrchestratorRequest>,
    ) -> Self {
        Self {
            receiver,
            workspace_id,
            config,
            machines: HashMap::new(),
            by_id: HashMap::new(),
            subscriptions: SubscriptionRegistry::new(),
            pending_restarts: HashSet::new(),
            events: EventBus::new(),
            status_handler: SubscriptionHandler::new(HandlerKind::Status, sender),
            output_handler: SubscriptionHandler::new(HandlerKind::Output, sender),
            next_handle: 0,
        }
    }

    /// Runs the event loop until every client is dropped.
    ///
    /// Subscription handlers do not keep the loop alive. Subscriptions still
    /// registered when the loop ends are released before returning.
    pub async fn run(mut self, ctx: OrchestratorContext) {
        info!(workspace = %self.workspace_id, "Orchestrator started");

        while let Some(request) = self.receiver.recv().await {
            self.handle_request(&ctx, request).await;
        }

        if !self.subscriptions.is_empty() {
            warn!(
                workspace = %self.workspace_id,
                count = self.subscriptions.len(),
                "Releasing subscriptions left at shutdown"
            );
            self.release_subscriptions(&ctx).await;
        }
        info!(workspace = %self.workspace_id, machines = self.machines.len(), "Shutdown");
    }

    async fn handle_request(&mut self, ctx: &OrchestratorContext, request: OrchestratorRequest) {
        match request {
            OrchestratorRequest::Start {
                config,
                operation,
                respond_to,
            } => {
                debug!(?config, "Start");
                let result = self.start_machine(ctx, config, operation).await;
                let _ = respond_to.send(result);
            }
            OrchestratorRequest::Destroy { handle, respond_to } => {
                debug!(%handle, "Destroy");
                let _ = respond_to.send(self.destroy_machine(ctx, handle).await);
            }
            OrchestratorRequest::Restart { handle, respond_to } => {
                debug!(%handle, "Restart");
                let _ = respond_to.send(self.restart_machine(ctx, handle).await);
            }
            OrchestratorRequest::EnvironmentStopped { respond_to } => {
                self.environment_stopped(ctx).await;
                let _ = respond_to.send(Ok(()));
            }
            OrchestratorRequest::GetMachine { handle, respond_to } => {
                let machine = self.machines.get(&handle).cloned();
                debug!(%handle, found = machine.is_some(), "Get");
                let _ = respond_to.send(Ok(machine));
            }
            OrchestratorRequest::ListMachines { respond_to } => {
                let mut machines: Vec<Machine> = self.machines.values().cloned().collect();
                machines.sort_by_key(|machine| machine.handle);
                let _ = respond_to.send(Ok(machines));
            }
            OrchestratorRequest::SubscribedChannels { respond_to } => {
                let _ = respond_to.send(Ok(self.subscriptions.channels()));
            }
            OrchestratorRequest::Listen { kinds, respond_to } => {
                let _ = respond_to.send(Ok(self.events.register(kinds)));
            }
            OrchestratorRequest::Unlisten { listener, respond_to } => {
                let _ = respond_to.send(Ok(self.events.remove(listener)));
            }
            OrchestratorRequest::Channel { channel, payload } => {
                self.on_channel_message(ctx, channel, payload).await;
            }
        }
    }

    async fn start_machine(
        &mut self,
        ctx: &OrchestratorContext,
        config: MachineConfig,
        operation: OperationType,
    ) -> Result<MachineHandle, OrchestratorError> {
        let descriptor = ctx
            .backend
            .request_start(&self.workspace_id, &config)
            .await
            .map_err(|source| {
                warn!(name = %config.name, error = %source, "Start rejected");
                OrchestratorError::StartRequestRejected {
                    machine: config.name.clone(),
                    source,
                }
            })?;

        self.next_handle += 1;
        let handle = MachineHandle(self.next_handle);
        if let Some(previous) = self.by_id.insert(descriptor.id.clone(), handle) {
            warn!(machine_id = %descriptor.id, %previous, "Backend reused a tracked machine id");
        }

        let is_dev = config.is_dev;
        let name = config.name.clone();
        let channels = descriptor.channels.clone();
        self.machines.insert(
            handle,
            Machine {
                handle,
                id: descriptor.id.clone(),
                workspace_id: self.workspace_id.clone(),
                status: MachineStatus::Creating,
                config,
                operation,
                channels: channels.clone(),
                destroy_requested: false,
            },
        );
        info!(%handle, machine_id = %descriptor.id, %name, ?operation, "Machine creating");

        self.events.publish(EnvironmentEvent::Machine(MachineStateEvent {
            action: MachineAction::Creating,
            handle,
            machine_id: descriptor.id,
            name: name.clone(),
            operation,
        }));
        self.publish_progress(handle, &name, OperationStatus::InProgress, None);

        if is_dev {
            let agent_log = self.config.agent_log_channel(&self.workspace_id);
            self.subscribe(ctx, agent_log, HandlerKind::Output).await;
        }
        if let Some(output) = channels.output {
            self.subscribe(ctx, output, HandlerKind::Output).await;
        }
        match channels.status {
            Some(status) => self.subscribe(ctx, status, HandlerKind::Status).await,
            None => {
                warn!(%handle, %name, "No status channel, machine cannot be tracked");
                self.publish_progress(
                    handle,
                    &name,
                    OperationStatus::Error,
                    Some("Machine status channel is unknown".to_string()),
                );
            }
        }

        Ok(handle)
    }

    async fn destroy_machine(&mut self, ctx: &OrchestratorContext, handle: MachineHandle) -> Result<(), OrchestratorError> {
        let machine = self
            .machines
            .get(&handle)
            .ok_or(OrchestratorError::MachineNotFound(handle))?;
        let tracked = self.by_id.get(&machine.id) == Some(&handle);
        if !tracked || machine.status == MachineStatus::Destroyed || machine.destroy_requested {
            return Err(OrchestratorError::InvalidState {
                handle,
                status: machine.status,
            });
        }
        let id = machine.id.clone();
        let name = machine.config.name.clone();

        ctx.backend
            .request_destroy(&self.workspace_id, &id)
            .await
            .map_err(|source| {
                warn!(%handle, error = %source, "Destroy rejected");
                OrchestratorError::DestroyRequestRejected { machine: name, source }
            })?;

        if let Some(machine) = self.machines.get_mut(&handle) {
            machine.destroy_requested = true;
        }
        self.unbind_dev_machine(ctx, &id);
        info!(%handle, machine_id = %id, "Destroy requested");
        Ok(())
    }

    async fn restart_machine(&mut self, ctx: &OrchestratorContext, handle: MachineHandle) -> Result<(), OrchestratorError> {
        self.destroy_machine(ctx, handle).await?;
        if let Some(machine) = self.machines.get(&handle) {
            info!(%handle, machine_id = %machine.id, "Restart armed");
            self.pending_restarts.insert(machine.id.clone());
        }
        Ok(())
    }

    async fn environment_stopped(&mut self, ctx: &OrchestratorContext) {
        let released = self.release_subscriptions(ctx).await;

        if let Some(dev) = ctx.session.dev_machine() {
            if self.machines.values().any(|machine| machine.id == dev.id) {
                ctx.session.set_dev_machine(None);
                ctx.session.set_projects_root(None);
            }
        }

        // A machine still booting will never report RUNNING now.
        let mut booting: Vec<(MachineHandle, String)> = self
            .machines
            .values()
            .filter(|machine| machine.status == MachineStatus::Creating)
            .map(|machine| (machine.handle, machine.config.name.clone()))
            .collect();
        booting.sort();
        for (handle, name) in booting {
            self.publish_progress(
                handle,
                &name,
                OperationStatus::Error,
                Some("Environment stopped before the machine was running".to_string()),
            );
        }

        self.machines.clear();
        self.by_id.clear();
        self.pending_restarts.clear();
        info!(workspace = %self.workspace_id, released, "Environment stopped");
    }

    async fn on_channel_message(&mut self, ctx: &OrchestratorContext, channel: ChannelId, payload: ChannelPayload) {
        match payload {
            ChannelPayload::Status(notification) => {
                if !self.subscriptions.contains(&channel, HandlerKind::Status) {
                    debug!(%channel, "Dropping status from unsubscribed channel");
                    return;
                }
                self.on_status(ctx, notification).await;
            }
            ChannelPayload::Output(line) => {
                if !self.subscriptions.contains(&channel, HandlerKind::Output) {
                    debug!(%channel, "Dropping output from unsubscribed channel");
                    return;
                }
                self.events.publish(EnvironmentEvent::Output(OutputLine { channel, line }));
            }
            ChannelPayload::Failure(reason) => {
                warn!(%channel, %reason, "Channel delivery failed");
            }
        }
    }

    async fn on_status(&mut self, ctx: &OrchestratorContext, notification: StatusNotification) {
        if notification.workspace_id != self.workspace_id {
            debug!(workspace = %notification.workspace_id, "Ignoring status of another workspace");
            return;
        }
        let Some(&handle) = self.by_id.get(&notification.machine_id) else {
            debug!(machine_id = %notification.machine_id, "Ignoring status of untracked machine");
            return;
        };

        if notification.event_type == MachineStatus::Destroyed {
            self.on_destroyed(ctx, handle).await;
            return;
        }

        let Some(machine) = self.machines.get_mut(&handle) else {
            return;
        };
        let current = machine.status;
        let Some(next) = current.transition(notification.event_type) else {
            warn!(%handle, from = %current, to = %notification.event_type, "Illegal transition ignored");
            return;
        };
        machine.status = next;
        if next == current {
            return;
        }

        match next {
            MachineStatus::Running => self.on_running(ctx, handle).await,
            MachineStatus::Error => self.on_error(handle, notification.error_message),
            MachineStatus::Creating | MachineStatus::Destroyed => {}
        }
    }

    async fn on_running(&mut self, ctx: &OrchestratorContext, handle: MachineHandle) {
        let Some(machine) = self.machines.get(&handle) else {
            return;
        };
        let id = machine.id.clone();
        let name = machine.config.name.clone();
        let operation = machine.operation;
        let bind_session = machine.is_dev() && !machine.destroy_requested;
        info!(%handle, machine_id = %id, %name, "Machine running");

        match ctx.backend.fetch_machine_detail(&id).await {
            Ok(detail) if bind_session => {
                ctx.session.set_dev_machine(Some(DevMachine {
                    id: id.clone(),
                    name: detail.name,
                    projects_root: detail.projects_root.clone(),
                }));
                ctx.session.set_projects_root(detail.projects_root);
                info!(%handle, machine_id = %id, "Dev machine bound to session");
            }
            Ok(_) => {}
            Err(e) => warn!(%handle, machine_id = %id, error = %e, "Machine detail unavailable"),
        }

        self.publish_progress(handle, &name, OperationStatus::Success, None);
        self.events.publish(EnvironmentEvent::Machine(MachineStateEvent {
            action: MachineAction::Running,
            handle,
            machine_id: id,
            name,
            operation,
        }));
    }

    fn on_error(&mut self, handle: MachineHandle, message: Option<String>) {
        let Some(machine) = self.machines.get(&handle) else {
            return;
        };
        let name = machine.config.name.clone();
        warn!(%handle, %name, error = ?message, "Machine failed");
        self.publish_progress(handle, &name, OperationStatus::Error, message);
    }

    async fn on_destroyed(&mut self, ctx: &OrchestratorContext, handle: MachineHandle) {
        let Some(machine) = self.machines.get_mut(&handle) else {
            return;
        };
        let was_creating = machine.status == MachineStatus::Creating;
        // An ERROR machine keeps its terminal status.
        if let Some(next) = machine.status.transition(MachineStatus::Destroyed) {
            machine.status = next;
        }
        let machine = machine.clone();
        if was_creating {
            self.publish_progress(
                handle,
                machine.name(),
                OperationStatus::Error,
                Some("Machine destroyed before it was running".to_string()),
            );
        }
        self.by_id.remove(&machine.id);
        info!(%handle, machine_id = %machine.id, status = %machine.status, "Machine destroyed");

        if let Some(status) = &machine.channels.status {
            self.unsubscribe(ctx, status, HandlerKind::Status).await;
        }
        if let Some(output) = &machine.channels.output {
            self.unsubscribe(ctx, output, HandlerKind::Output).await;
        }
        self.unbind_dev_machine(ctx, &machine.id);

        self.events.publish(EnvironmentEvent::Machine(MachineStateEvent {
            action: MachineAction::Destroyed,
            handle,
            machine_id: machine.id.clone(),
            name: machine.config.name.clone(),
            operation: machine.operation,
        }));

        if self.pending_restarts.remove(&machine.id) {
            match self.start_machine(ctx, machine.config.clone(), OperationType::Restart).await {
                Ok(restarted) => info!(%handle, %restarted, "Machine restarted"),
                Err(e) => {
                    warn!(%handle, error = %e, "Restart failed");
                    self.publish_progress(handle, machine.name(), OperationStatus::Error, Some(e.to_string()));
                }
            }
        }
    }

    async fn subscribe(&mut self, ctx: &OrchestratorContext, channel: ChannelId, kind: HandlerKind) {
        if self.subscriptions.contains(&channel, kind) {
            debug!(%channel, ?kind, "Already subscribed");
            return;
        }
        let handler = self.handler(kind).clone();
        match ctx.bus.subscribe(&channel, handler).await {
            Ok(()) => {
                debug!(%channel, ?kind, "Subscribed");
                self.subscriptions.insert(channel, kind);
            }
            Err(e) => warn!(%channel, ?kind, error = %e, "Subscribe failed"),
        }
    }

    async fn unsubscribe(&mut self, ctx: &OrchestratorContext, channel: &ChannelId, kind: HandlerKind) {
        if !self.subscriptions.remove(channel, kind) {
            return;
        }
        match ctx.bus.unsubscribe(channel, self.handler(kind)).await {
            Ok(()) => debug!(%channel, ?kind, "Unsubscribed"),
            Err(e) => warn!(%channel, ?kind, error = %e, "Unsubscribe failed"),
        }
    }

    /// Unsubscribes every registered channel once. Returns how many were released.
    async fn release_subscriptions(&mut self, ctx: &OrchestratorContext) -> usize {
        let entries = self.subscriptions.drain();
        for (channel, kind) in &entries {
            if let Err(e) = ctx.bus.unsubscribe(channel, self.handler(*kind)).await {
                warn!(%channel, ?kind, error = %e, "Unsubscribe failed");
            }
        }
        entries.len()
    }

    fn unbind_dev_machine(&self, ctx: &OrchestratorContext, id: &MachineId) {
        if ctx.session.dev_machine().is_some_and(|dev| dev.id == *id) {
            ctx.session.set_dev_machine(None);
            ctx.session.set_projects_root(None);
            info!(machine_id = %id, "Dev machine unbound from session");
        }
    }

    fn handler(&self, kind: HandlerKind) -> &SubscriptionHandler {
        match kind {
            HandlerKind::Status => &self.status_handler,
            HandlerKind::Output => &self.output_handler,
        }
    }

    fn publish_progress(
        &mut self,
        handle: MachineHandle,
        machine_name: &str,
        status: OperationStatus,
        message: Option<String>,
    ) {
        self.events.publish(EnvironmentEvent::Progress(ProgressEvent {
            handle,
            machine_name: machine_name.to_string(),
            status,
            message,
        }));
    }
}

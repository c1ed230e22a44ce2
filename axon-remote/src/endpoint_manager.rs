use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axon_actors::{Actor, ActorContext, ActorError, MessageEnvelope, SystemMessage};
use axon_proto::Pid;
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::endpoint_watcher::endpoint_watcher_props;
use crate::endpoint_writer::endpoint_writer_props;
use crate::messages::{
    EndpointConnectedEvent, EndpointSuspendedEvent, EndpointTerminatedEvent, RemoteDeliver,
    RemoteTerminate, RemoteUnwatch, RemoteWatch, ShutdownAck, ShutdownEndpoints,
};
use crate::serialization::SerializerRegistry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum EndpointState {
    Connecting,
    Connected,
    Suspended,
    Terminated,
}

/// One writer/watcher pair per peer address.
pub(crate) struct Endpoint {
    writer: Pid,
    watcher: Pid,
    state: EndpointState,
}

/// Keeps the `address -> Endpoint` map. The map is only touched from this
/// actor: every outbound reference (deliver, watch, spawn request) flows
/// through its mailbox, endpoints are created lazily on first use and torn
/// down when their transport is reported lost.
pub(crate) struct EndpointManager {
    config: Arc<RemoteConfig>,
    serialization: Arc<SerializerRegistry>,
    endpoints: HashMap<String, Endpoint>,
}

impl EndpointManager {
    pub fn new(config: Arc<RemoteConfig>, serialization: Arc<SerializerRegistry>) -> EndpointManager {
        EndpointManager {
            config,
            serialization,
            endpoints: HashMap::new(),
        }
    }

    fn ensure_endpoint(
        &mut self,
        ctx: &ActorContext,
        address: &str,
    ) -> Result<&Endpoint, ActorError> {
        let needs_create = match self.endpoints.get(address) {
            // A terminated entry is history, not a live endpoint; the next
            // outbound reference replaces it with a fresh pair.
            Some(endpoint) => endpoint.state == EndpointState::Terminated,
            None => true,
        };
        if needs_create {
            info!(peer = %address, "opening endpoint");
            let writer_props = endpoint_writer_props(
                address.to_string(),
                self.config.clone(),
                self.serialization.clone(),
            );
            let writer = ctx
                .spawn(&writer_props)
                .map_err(anyhow::Error::new)?;
            let watcher_props = endpoint_watcher_props(address.to_string(), writer.clone());
            let watcher = ctx
                .spawn(&watcher_props)
                .map_err(anyhow::Error::new)?;
            self.endpoints.insert(
                address.to_string(),
                Endpoint {
                    writer,
                    watcher,
                    state: EndpointState::Connecting,
                },
            );
        }
        Ok(self
            .endpoints
            .get(address)
            .ok_or_else(|| anyhow::anyhow!("endpoint for {} vanished", address))?)
    }

    fn on_endpoint_terminated(&mut self, ctx: &ActorContext, event: &EndpointTerminatedEvent) {
        let endpoint = match self.endpoints.get_mut(&event.address) {
            Some(endpoint) if endpoint.state != EndpointState::Terminated => endpoint,
            // Already torn down; writer and monitor may both report the loss.
            _ => return,
        };
        info!(peer = %event.address, state = ?endpoint.state, "endpoint terminated");
        endpoint.state = EndpointState::Terminated;
        // The watcher synthesizes terminations for its table and then stops
        // itself; a system-level stop here would preempt the queued event.
        ctx.send(&endpoint.watcher, MessageEnvelope::new(event.clone()));
        // Stopping the writer drains whatever is still queued to dead
        // letters; its stopped hook closes the stream.
        ctx.system()
            .root()
            .send_system(&endpoint.writer, SystemMessage::Stop);
    }

    fn on_shutdown(&mut self, ctx: &ActorContext) {
        for (address, endpoint) in self.endpoints.drain() {
            debug!(peer = %address, "closing endpoint on shutdown");
            // The writer's stopped hook closes its stream; stopping drains
            // whatever is still queued to dead letters.
            ctx.system()
                .root()
                .send_system(&endpoint.writer, SystemMessage::Stop);
            // Shutdown is not a peer loss: stop the watcher without letting
            // it fabricate terminations.
            ctx.system()
                .root()
                .send_system(&endpoint.watcher, SystemMessage::Stop);
        }
        ctx.respond(ShutdownAck);
    }
}

#[async_trait]
impl Actor for EndpointManager {
    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if envelope.message.is::<RemoteDeliver>() {
            let deliver = match envelope.message.downcast::<RemoteDeliver>() {
                Ok(deliver) => deliver,
                Err(_) => return Ok(()),
            };
            let writer = {
                let endpoint = self.ensure_endpoint(ctx, &deliver.target.address)?;
                endpoint.writer.clone()
            };
            ctx.send(&writer, MessageEnvelope::from_boxed(deliver));
            return Ok(());
        }
        if let Some(watch) = envelope.message_as::<RemoteWatch>() {
            let watchee_address = watch.watchee.address.clone();
            let watcher_pid = {
                let endpoint = self.ensure_endpoint(ctx, &watchee_address)?;
                endpoint.watcher.clone()
            };
            ctx.send(&watcher_pid, MessageEnvelope::from_boxed(envelope.message));
            return Ok(());
        }
        if let Some(unwatch) = envelope.message_as::<RemoteUnwatch>() {
            if let Some(endpoint) = self.endpoints.get(&unwatch.watchee.address) {
                let watcher_pid = endpoint.watcher.clone();
                ctx.send(&watcher_pid, MessageEnvelope::from_boxed(envelope.message));
            }
            return Ok(());
        }
        if let Some(terminate) = envelope.message_as::<RemoteTerminate>() {
            if let Some(endpoint) = self.endpoints.get(&terminate.watchee.address) {
                let watcher_pid = endpoint.watcher.clone();
                ctx.send(&watcher_pid, MessageEnvelope::from_boxed(envelope.message));
            }
            return Ok(());
        }
        if let Some(event) = envelope.message_as::<EndpointTerminatedEvent>() {
            self.on_endpoint_terminated(ctx, event);
            return Ok(());
        }
        if let Some(event) = envelope.message_as::<EndpointConnectedEvent>() {
            if let Some(endpoint) = self.endpoints.get_mut(&event.address) {
                if matches!(
                    endpoint.state,
                    EndpointState::Connecting | EndpointState::Suspended
                ) {
                    endpoint.state = EndpointState::Connected;
                }
            }
            return Ok(());
        }
        if let Some(event) = envelope.message_as::<EndpointSuspendedEvent>() {
            if let Some(endpoint) = self.endpoints.get_mut(&event.address) {
                if matches!(
                    endpoint.state,
                    EndpointState::Connecting | EndpointState::Connected
                ) {
                    debug!(peer = %event.address, "endpoint suspended");
                    endpoint.state = EndpointState::Suspended;
                }
            }
            return Ok(());
        }
        if envelope.message.is::<ShutdownEndpoints>() {
            self.on_shutdown(ctx);
            return Ok(());
        }
        Ok(())
    }
}

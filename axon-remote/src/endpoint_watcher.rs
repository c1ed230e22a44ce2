use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axon_actors::{Actor, ActorContext, ActorError, MessageEnvelope, Props, SystemMessage};
use axon_proto::actor::{Terminated, Unwatch, Watch};
use axon_proto::Pid;
use tracing::debug;

use crate::messages::{
    EndpointTerminatedEvent, RemoteDeliver, RemoteTerminate, RemoteUnwatch, RemoteWatch,
};
use crate::serialization::SERIALIZER_ID_PROTO;

/// Tracks which local actors watch which actors on one peer, and fabricates
/// termination notices when the peer is lost.
///
/// Invariants: adding the same (watcher, watchee) pair twice is a no-op; at
/// most one `Terminated` is delivered per pair per logical termination;
/// `address_terminated` tells a graceful stop (`false`) from a transport
/// loss (`true`).
pub(crate) struct EndpointWatcher {
    address: String,
    writer: Pid,
    watched: HashMap<String, HashSet<Pid>>,
}

pub(crate) fn endpoint_watcher_props(address: String, writer: Pid) -> Props {
    Props::from_producer(move || {
        Box::new(EndpointWatcher {
            address: address.clone(),
            writer: writer.clone(),
            watched: HashMap::new(),
        })
    })
}

impl EndpointWatcher {
    fn send_control(&self, ctx: &ActorContext, target: Pid, message: axon_actors::DynMessage) {
        let deliver = RemoteDeliver {
            header: HashMap::new(),
            message,
            target,
            sender: None,
            serializer_id: SERIALIZER_ID_PROTO,
        };
        ctx.send(&self.writer, MessageEnvelope::from_boxed(Box::new(deliver)));
    }

    fn on_remote_watch(&mut self, ctx: &ActorContext, watch: &RemoteWatch) {
        let added = self
            .watched
            .entry(watch.watchee.id.clone())
            .or_insert_with(HashSet::new)
            .insert(watch.watcher.clone());
        if !added {
            return;
        }
        self.send_control(
            ctx,
            watch.watchee.clone(),
            Box::new(Watch {
                watcher: Some(watch.watcher.clone()),
            }),
        );
    }

    fn on_remote_unwatch(&mut self, ctx: &ActorContext, unwatch: &RemoteUnwatch) {
        if let Some(watchers) = self.watched.get_mut(&unwatch.watchee.id) {
            watchers.remove(&unwatch.watcher);
            if watchers.is_empty() {
                self.watched.remove(&unwatch.watchee.id);
            }
        }
        self.send_control(
            ctx,
            unwatch.watchee.clone(),
            Box::new(Unwatch {
                watcher: Some(unwatch.watcher.clone()),
            }),
        );
    }

    fn on_remote_terminate(&mut self, ctx: &ActorContext, terminate: &RemoteTerminate) {
        let removed = match self.watched.get_mut(&terminate.watchee.id) {
            Some(watchers) => {
                let removed = watchers.remove(&terminate.watcher);
                if watchers.is_empty() {
                    self.watched.remove(&terminate.watchee.id);
                }
                removed
            }
            None => false,
        };
        if !removed {
            // Already notified (or never watched): keep it at-most-once.
            return;
        }
        let terminated = Terminated {
            who: Some(terminate.watchee.clone()),
            address_terminated: false,
        };
        ctx.system()
            .process_registry()
            .get(&terminate.watcher)
            .send_system_message(&terminate.watcher, SystemMessage::Terminated(terminated));
    }

    fn on_endpoint_terminated(&mut self, ctx: &ActorContext) {
        debug!(
            peer = %self.address,
            watched = self.watched.len(),
            "peer lost, synthesizing terminations"
        );
        for (watchee_id, watchers) in self.watched.drain() {
            let who = Pid::new(self.address.clone(), watchee_id);
            for watcher in watchers {
                let terminated = Terminated {
                    who: Some(who.clone()),
                    address_terminated: true,
                };
                ctx.system()
                    .process_registry()
                    .get(&watcher)
                    .send_system_message(&watcher, SystemMessage::Terminated(terminated));
            }
        }
        // Nothing left to track once the peer is gone.
        ctx.stop_self();
    }
}

#[async_trait]
impl Actor for EndpointWatcher {
    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(watch) = envelope.message_as::<RemoteWatch>() {
            self.on_remote_watch(ctx, watch);
        } else if let Some(unwatch) = envelope.message_as::<RemoteUnwatch>() {
            self.on_remote_unwatch(ctx, unwatch);
        } else if let Some(terminate) = envelope.message_as::<RemoteTerminate>() {
            self.on_remote_terminate(ctx, terminate);
        } else if envelope.message_as::<EndpointTerminatedEvent>().is_some() {
            self.on_endpoint_terminated(ctx);
        }
        Ok(())
    }
}

use std::sync::{Arc, Mutex};

use axon_actors::{ActorSystem, DeadLetterEvent, MessageEnvelope, SystemMessage};
use axon_proto::actor::{Stop, Terminated, Unwatch, Watch};
use axon_proto::remote::remote_message::MessageType;
use axon_proto::remote::remoting_server::Remoting;
use axon_proto::remote::{MessageBatch, RemoteMessage, Unit};
use axon_proto::Pid;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::messages::RemoteTerminate;
use crate::serialization::SerializerRegistry;

/// The server side of the remoting stream: consumes inbound batches and
/// forwards their messages into the local dispatch path. Faulty envelopes
/// dead-letter without closing the stream.
#[derive(Clone)]
pub(crate) struct EndpointReader {
    system: ActorSystem,
    serialization: Arc<SerializerRegistry>,
    manager: Pid,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EndpointReader {
    pub fn new(
        system: ActorSystem,
        serialization: Arc<SerializerRegistry>,
        manager: Pid,
    ) -> EndpointReader {
        EndpointReader {
            system,
            serialization,
            manager,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle used by the remoting lifecycle to sever live connections on
    /// shutdown; ending a connection task completes its response stream,
    /// which peers observe as endpoint loss.
    pub fn connections(&self) -> Arc<Mutex<Vec<JoinHandle<()>>>> {
        self.connections.clone()
    }

    fn on_batch(&self, batch: MessageBatch) {
        for envelope in batch.envelopes {
            let type_name = match batch.type_names.get(envelope.type_index as usize) {
                Some(type_name) => type_name,
                None => {
                    warn!(type_index = envelope.type_index, "batch type index out of range");
                    continue;
                }
            };
            let target = match batch.targets.get(envelope.target_index as usize) {
                Some(target) => target.clone(),
                None => {
                    warn!(target_index = envelope.target_index, "batch target index out of range");
                    continue;
                }
            };
            let message = match self.serialization.deserialize(
                type_name,
                &envelope.message_data,
                envelope.serializer_id,
            ) {
                Ok(message) => message,
                Err(error) => {
                    warn!(wire_type = %type_name, "failed to deserialize inbound message: {}", error);
                    self.system.event_stream().publish(DeadLetterEvent {
                        target,
                        message: Box::new(type_name.clone()),
                        sender: envelope.sender.clone(),
                    });
                    continue;
                }
            };
            let registry = self.system.process_registry();
            if let Some(terminated) = message.downcast_ref::<Terminated>() {
                // The peer reports a watched actor stopped; route it through
                // the watch registry so the pair is cleared exactly once.
                let watchee = match &terminated.who {
                    Some(watchee) => watchee.clone(),
                    None => continue,
                };
                let terminate = RemoteTerminate {
                    watcher: target,
                    watchee,
                };
                self.system.root().send(
                    &self.manager,
                    MessageEnvelope::from_boxed(Box::new(terminate)),
                );
                continue;
            }
            if let Some(watch) = message.downcast_ref::<Watch>() {
                let watcher = match &watch.watcher {
                    Some(watcher) => watcher.clone(),
                    None => continue,
                };
                match registry.get_local(&target.id) {
                    Some(process) => {
                        process.send_system_message(&target, SystemMessage::Watch(watcher));
                    }
                    None => {
                        // The watchee is already gone: answer the watch with
                        // an immediate termination notice.
                        let terminated = Terminated {
                            who: Some(target.clone()),
                            address_terminated: false,
                        };
                        registry
                            .get(&watcher)
                            .send_system_message(&watcher, SystemMessage::Terminated(terminated));
                    }
                }
                continue;
            }
            if let Some(unwatch) = message.downcast_ref::<Unwatch>() {
                if let Some(watcher) = &unwatch.watcher {
                    if let Some(process) = registry.get_local(&target.id) {
                        process.send_system_message(&target, SystemMessage::Unwatch(watcher.clone()));
                    }
                }
                continue;
            }
            if message.downcast_ref::<Stop>().is_some() {
                match registry.get_local(&target.id) {
                    Some(process) => process.stop(&target),
                    None => debug!(target_pid = %target, "stop for unknown actor"),
                }
                continue;
            }
            let header = envelope
                .message_header
                .map(|header| header.header_data)
                .unwrap_or_default();
            match registry.get_local(&target.id) {
                Some(process) => {
                    let mut local_envelope = MessageEnvelope::from_boxed(message).with_header(header);
                    local_envelope.sender = envelope.sender;
                    process.send_user_message(&target, local_envelope);
                }
                None => {
                    self.system.event_stream().publish(DeadLetterEvent {
                        target,
                        message,
                        sender: envelope.sender,
                    });
                }
            }
        }
    }
}

#[tonic::async_trait]
impl Remoting for EndpointReader {
    type ReceiveStream = ReceiverStream<Result<Unit, Status>>;

    async fn receive(
        &self,
        request: Request<Streaming<RemoteMessage>>,
    ) -> Result<Response<Self::ReceiveStream>, Status> {
        let mut inbound = request.into_inner();
        let (response_tx, response_rx) = mpsc::channel::<Result<Unit, Status>>(1);
        let reader = self.clone();
        let connection = tokio::spawn(async move {
            // Holding the sender keeps the response stream open for the
            // lifetime of the connection.
            let _response_tx = response_tx;
            let mut peer: Option<String> = None;
            while let Some(frame) = inbound.next().await {
                match frame {
                    Ok(RemoteMessage {
                        message_type: Some(MessageType::Connect(connect)),
                    }) => {
                        info!(peer = %connect.address, "peer connected");
                        peer = Some(connect.address);
                    }
                    Ok(RemoteMessage {
                        message_type: Some(MessageType::MessageBatch(batch)),
                    }) => {
                        if peer.is_none() {
                            warn!("message batch before connect frame");
                        }
                        reader.on_batch(batch);
                    }
                    Ok(RemoteMessage { message_type: None }) => {
                        warn!("empty remote message frame");
                    }
                    Err(status) => {
                        debug!("inbound stream error: {}", status);
                        break;
                    }
                }
            }
            debug!(peer = ?peer, "inbound stream ended");
        });
        let mut connections = self.connections.lock().unwrap();
        connections.retain(|connection| !connection.is_finished());
        connections.push(connection);
        Ok(Response::new(ReceiverStream::new(response_rx)))
    }
}

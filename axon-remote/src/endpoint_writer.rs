use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axon_actors::{
    Actor, ActorContext, ActorError, ActorSystem, MessageEnvelope, Props, SystemMessage,
};
use axon_proto::remote::remote_message::MessageType;
use axon_proto::remote::remoting_client::RemotingClient;
use axon_proto::remote::{Connect, MessageBatch, MessageEnvelope as WireEnvelope, MessageHeader, RemoteMessage};
use axon_proto::Pid;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::endpoint_writer_mailbox::EndpointWriterMailbox;
use crate::messages::{
    EndpointConnectedEvent, EndpointTerminatedEvent, EndpointWriterBatch, RemoteDeliver,
};
use crate::serialization::SerializerRegistry;

/// Owns the outbound stream to one peer. Batches arrive from the endpoint
/// writer mailbox, get serialized with pooled type-name/target tables, and
/// go out as single `MessageBatch` frames.
pub(crate) struct EndpointWriter {
    address: String,
    config: Arc<RemoteConfig>,
    serialization: Arc<SerializerRegistry>,
    sink: Option<mpsc::Sender<RemoteMessage>>,
    monitor: Option<JoinHandle<()>>,
}

pub(crate) fn endpoint_writer_props(
    address: String,
    config: Arc<RemoteConfig>,
    serialization: Arc<SerializerRegistry>,
) -> Props {
    let batch_size = config.endpoint_writer_batch_size;
    let mailbox_address = address.clone();
    Props::from_producer(move || {
        Box::new(EndpointWriter {
            address: address.clone(),
            config: config.clone(),
            serialization: serialization.clone(),
            sink: None,
            monitor: None,
        })
    })
    .with_mailbox(move |invoker, system| {
        EndpointWriterMailbox::create(
            invoker,
            system.event_stream().clone(),
            batch_size,
            mailbox_address.clone(),
        )
    })
}

impl EndpointWriter {
    async fn connect(&mut self, system: &ActorSystem) -> anyhow::Result<()> {
        let channel = self.connect_channel().await?;
        let mut client = RemotingClient::new(channel);
        let (sink, frames) = mpsc::channel::<RemoteMessage>(32);
        sink.send(RemoteMessage {
            message_type: Some(MessageType::Connect(Connect {
                address: system.address(),
            })),
        })
        .await?;
        let response = client
            .receive(tonic::Request::new(ReceiverStream::new(frames)))
            .await?;
        let mut inbound = response.into_inner();
        let event_stream = system.event_stream().clone();
        let address = self.address.clone();
        let monitor = tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                if frame.is_err() {
                    break;
                }
            }
            debug!(peer = %address, "endpoint stream closed by peer");
            event_stream.publish(EndpointTerminatedEvent { address });
        });
        self.sink = Some(sink);
        self.monitor = Some(monitor);
        Ok(())
    }

    /// Dials the peer, retrying with a linear back-off until `max_retries`
    /// attempts or `retry_time_span` are exhausted.
    async fn connect_channel(&self) -> anyhow::Result<Channel> {
        let scheme = if self.config.channel_tls.is_some() {
            "https"
        } else {
            "http"
        };
        let uri = http::Uri::builder()
            .scheme(scheme)
            .authority(self.address.as_str())
            .path_and_query("/")
            .build()?;
        let mut endpoint = Endpoint::from(uri);
        if let Some(tls) = &self.config.channel_tls {
            endpoint = endpoint.tls_config(tls.clone())?;
        }
        let started_at = tokio::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match endpoint.connect().await {
                Ok(channel) => return Ok(channel),
                Err(error) => {
                    if attempt >= self.config.max_retries
                        || started_at.elapsed() >= self.config.retry_time_span
                    {
                        return Err(error.into());
                    }
                    debug!(
                        peer = %self.address,
                        attempt,
                        "connect failed, backing off: {}",
                        error
                    );
                    tokio::time::sleep(self.config.retry_back_off * attempt).await;
                }
            }
        }
    }

    async fn send_batch(
        &mut self,
        system: &ActorSystem,
        deliveries: &[RemoteDeliver],
    ) -> Result<(), ActorError> {
        let sink = match &self.sink {
            Some(sink) => sink.clone(),
            None => return Err(unavailable(system, &self.address)),
        };
        let mut type_names: Vec<String> = Vec::new();
        let mut type_indexes: HashMap<String, i32> = HashMap::new();
        let mut targets: Vec<Pid> = Vec::new();
        let mut target_indexes: HashMap<Pid, i32> = HashMap::new();
        let mut envelopes: Vec<WireEnvelope> = Vec::with_capacity(deliveries.len());
        for deliver in deliveries {
            let type_name = match self.serialization.type_name(deliver.message.as_ref()) {
                Ok(type_name) => type_name,
                Err(error) => {
                    warn!(target_pid = %deliver.target, "dropping unserializable message: {}", error);
                    continue;
                }
            };
            let message_data = match self
                .serialization
                .serialize(deliver.message.as_ref(), deliver.serializer_id)
            {
                Ok(message_data) => message_data,
                Err(error) => {
                    warn!(target_pid = %deliver.target, "dropping unserializable message: {}", error);
                    continue;
                }
            };
            let type_index = match type_indexes.get(&type_name) {
                Some(index) => *index,
                None => {
                    let index = type_names.len() as i32;
                    type_indexes.insert(type_name.clone(), index);
                    type_names.push(type_name);
                    index
                }
            };
            let target_index = match target_indexes.get(&deliver.target) {
                Some(index) => *index,
                None => {
                    let index = targets.len() as i32;
                    target_indexes.insert(deliver.target.clone(), index);
                    targets.push(deliver.target.clone());
                    index
                }
            };
            let message_header = if deliver.header.is_empty() {
                None
            } else {
                Some(MessageHeader {
                    header_data: deliver.header.clone(),
                })
            };
            envelopes.push(WireEnvelope {
                type_index,
                message_data,
                target_index,
                sender: deliver.sender.clone(),
                serializer_id: deliver.serializer_id,
                message_header,
            });
        }
        if envelopes.is_empty() {
            return Ok(());
        }
        let frame = RemoteMessage {
            message_type: Some(MessageType::MessageBatch(MessageBatch {
                type_names,
                targets,
                envelopes,
            })),
        };
        let batch_len = deliveries.len();
        if sink.send(frame).await.is_err() {
            system.event_stream().publish(EndpointTerminatedEvent {
                address: self.address.clone(),
            });
            return Err(ActorError::Failure(
                anyhow::Error::new(tonic::Status::unavailable("endpoint stream closed"))
                    .context(format!(
                        "delivering a batch of {} messages to {}",
                        batch_len, self.address
                    )),
            ));
        }
        Ok(())
    }

    fn close_stream(&mut self) {
        self.sink = None;
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

fn unavailable(system: &ActorSystem, address: &str) -> ActorError {
    system.event_stream().publish(EndpointTerminatedEvent {
        address: address.to_string(),
    });
    ActorError::Failure(anyhow::Error::new(tonic::Status::unavailable(
        "endpoint stream closed",
    )))
}

#[async_trait]
impl Actor for EndpointWriter {
    async fn started(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        debug!(peer = %self.address, "endpoint writer starting");
        match self.connect(ctx.system()).await {
            Ok(()) => {
                info!(peer = %self.address, "endpoint connected");
                ctx.system().event_stream().publish(EndpointConnectedEvent {
                    address: self.address.clone(),
                });
                // Lift the mailbox suspension now that the stream is up.
                if let Some(process) = ctx
                    .system()
                    .process_registry()
                    .get_local(&ctx.self_pid().id)
                {
                    process.send_system_message(ctx.self_pid(), SystemMessage::ResumeMailbox);
                }
            }
            Err(error) => {
                warn!(peer = %self.address, "endpoint connection failed: {}", error);
                ctx.system().event_stream().publish(EndpointTerminatedEvent {
                    address: self.address.clone(),
                });
            }
        }
        Ok(())
    }

    async fn stopped(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        debug!(peer = %self.address, "endpoint writer stopped");
        self.close_stream();
        Ok(())
    }

    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(batch) = envelope.message_as::<EndpointWriterBatch>() {
            let system = ctx.system().clone();
            return self.send_batch(&system, &batch.0).await;
        }
        Ok(())
    }
}

//! Remote messaging and supervision for axon: lets actors on one node
//! address, invoke, watch, and spawn actors on another node over a
//! bidirectional streaming RPC.
//!
//! `Remote::start` binds the server, installs the address resolver that
//! turns non-local PIDs into endpoint traffic, and spawns the endpoint
//! manager and the activator. Endpoints (one writer/watcher actor pair per
//! peer) are created lazily on first outbound reference and recreated after
//! transport loss.

mod activator;
mod config;
mod endpoint_manager;
mod endpoint_reader;
mod endpoint_watcher;
mod endpoint_writer;
mod endpoint_writer_mailbox;
mod messages;
mod remote_process;
mod serialization;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axon_actors::{ActorSystem, MessageEnvelope, RequestError};
use axon_proto::remote::remoting_server::RemotingServer;
use axon_proto::remote::{ActorPidRequest, ActorPidResponse, ResponseStatusCode};
use axon_proto::Pid;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{error, info, warn};

pub use crate::activator::ACTIVATOR_NAME;
pub use crate::config::RemoteConfig;
pub use crate::endpoint_writer_mailbox::EndpointWriterMailbox;
pub use crate::messages::{
    EndpointConnectedEvent, EndpointSuspendedEvent, EndpointTerminatedEvent, RemoteDeliver,
};
pub use crate::serialization::{
    SerializationError, SerializerRegistry, SERIALIZER_ID_JSON, SERIALIZER_ID_PROTO,
};

use crate::activator::activator_props;
use crate::endpoint_manager::EndpointManager;
use crate::endpoint_reader::EndpointReader;
use crate::messages::{ShutdownAck, ShutdownEndpoints};
use crate::remote_process::RemoteProcess;
use crate::serialization::register_wire_types;

/// A started remoting layer. Dropping it does not stop the server; call
/// [`Remote::shutdown`] for a graceful teardown.
pub struct Remote {
    system: ActorSystem,
    serialization: Arc<SerializerRegistry>,
    manager: Pid,
    activator: Pid,
    advertised_address: String,
    bound_addr: SocketAddr,
    server: JoinHandle<()>,
    event_forwarder: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Remote {
    /// Binds the remoting server, fixes the node's advertised address, and
    /// wires the remote send path into the process registry.
    pub async fn start(system: &ActorSystem, mut config: RemoteConfig) -> anyhow::Result<Remote> {
        let server_tls = config.server_tls.take();
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let bound_addr = listener.local_addr()?;
        let advertised_host = config
            .advertised_host
            .clone()
            .unwrap_or_else(|| config.host.clone());
        let advertised_port = config.advertised_port.unwrap_or_else(|| bound_addr.port());
        let advertised_address = format!("{}:{}", advertised_host, advertised_port);
        system.process_registry().set_address(advertised_address.clone());

        let serialization = Arc::new(SerializerRegistry::default());
        register_wire_types(&serialization);

        let config = Arc::new(config);
        let manager_config = config.clone();
        let manager_serialization = serialization.clone();
        let manager_props = axon_actors::Props::from_producer(move || {
            Box::new(EndpointManager::new(
                manager_config.clone(),
                manager_serialization.clone(),
            ))
        });
        let manager = system
            .root()
            .spawn(&manager_props)
            .map_err(anyhow::Error::new)?;

        let activator = system
            .root()
            .spawn_named(&activator_props(config.clone()), ACTIVATOR_NAME)
            .map_err(anyhow::Error::new)?;

        let resolver_system = system.clone();
        let resolver_manager = manager.clone();
        let resolver_serialization = serialization.clone();
        system
            .process_registry()
            .register_resolver(Arc::new(move |_pid| {
                let process: Arc<dyn axon_actors::Process> = Arc::new(RemoteProcess::new(
                    resolver_system.clone(),
                    resolver_manager.clone(),
                    resolver_serialization.clone(),
                ));
                Some(process)
            }));

        let events = system.event_stream().subscribe();
        let event_forwarder = tokio::spawn(forward_endpoint_events(
            events,
            system.clone(),
            manager.clone(),
        ));

        let reader = EndpointReader::new(system.clone(), serialization.clone(), manager.clone());
        let connections = reader.connections();
        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = server_tls {
            builder = builder.tls_config(tls)?;
        }
        let incoming = TcpListenerStream::new(listener);
        let server = tokio::spawn(async move {
            if let Err(err) = builder
                .add_service(RemotingServer::new(reader))
                .serve_with_incoming(incoming)
                .await
            {
                error!("remoting server failed: {}", err);
            }
        });

        info!(address = %advertised_address, "remote started");
        Ok(Remote {
            system: system.clone(),
            serialization,
            manager,
            activator,
            advertised_address,
            bound_addr,
            server,
            event_forwarder,
            connections,
        })
    }

    /// The address this node advertises to peers.
    pub fn address(&self) -> &str {
        &self.advertised_address
    }

    /// The socket the server actually bound (useful with port 0).
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Message types must be registered on both ends before they can cross
    /// the wire.
    pub fn serializer_registry(&self) -> &Arc<SerializerRegistry> {
        &self.serialization
    }

    /// Asks `address` to spawn an actor of `kind` under `name` (empty name:
    /// the peer generates one). An elapsed timeout is reported through the
    /// response status code.
    pub async fn spawn_named(
        &self,
        address: &str,
        name: &str,
        kind: &str,
        timeout: Duration,
    ) -> ActorPidResponse {
        let activator = Pid::new(address, ACTIVATOR_NAME);
        let request = ActorPidRequest {
            name: name.to_string(),
            kind: kind.to_string(),
        };
        match self
            .system
            .root()
            .request_async::<ActorPidResponse, _>(&activator, request, timeout)
            .await
        {
            Ok(response) => response,
            Err(RequestError::Timeout) => ActorPidResponse {
                pid: None,
                status_code: ResponseStatusCode::Timeout as i32,
            },
            Err(error) => {
                warn!(peer = %address, "remote spawn failed: {}", error);
                ActorPidResponse {
                    pid: None,
                    status_code: ResponseStatusCode::Error as i32,
                }
            }
        }
    }

    /// Drains every endpoint (pending deliveries become dead letters) and
    /// stops the remoting actors and server.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let drained = self
            .system
            .root()
            .request_async::<ShutdownAck, _>(&self.manager, ShutdownEndpoints, Duration::from_secs(5))
            .await;
        if let Err(error) = drained {
            warn!("endpoint drain did not complete during shutdown: {}", error);
        }
        self.system.root().stop(&self.manager);
        self.system.root().stop(&self.activator);
        self.event_forwarder.abort();
        self.server.abort();
        for connection in self.connections.lock().unwrap().drain(..) {
            connection.abort();
        }
        info!(address = %self.advertised_address, "remote stopped");
        Ok(())
    }
}

/// Routes endpoint lifecycle events from the event stream into the endpoint
/// manager's mailbox, so the endpoint map is only ever touched from the
/// manager actor.
async fn forward_endpoint_events(
    events: flume::Receiver<Arc<dyn Any + Send + Sync>>,
    system: ActorSystem,
    manager: Pid,
) {
    while let Ok(event) = events.recv_async().await {
        if let Some(terminated) = event.downcast_ref::<EndpointTerminatedEvent>() {
            system
                .root()
                .send(&manager, MessageEnvelope::new(terminated.clone()));
        } else if let Some(connected) = event.downcast_ref::<EndpointConnectedEvent>() {
            system
                .root()
                .send(&manager, MessageEnvelope::new(connected.clone()));
        } else if let Some(suspended) = event.downcast_ref::<EndpointSuspendedEvent>() {
            system
                .root()
                .send(&manager, MessageEnvelope::new(suspended.clone()));
        }
    }
}

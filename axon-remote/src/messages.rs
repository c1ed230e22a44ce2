use std::collections::HashMap;

use axon_actors::DynMessage;
use axon_proto::Pid;

/// An outbound user message on its way to the endpoint writer: produced by
/// the remote send path, coalesced into wire batches by the writer mailbox.
pub struct RemoteDeliver {
    pub header: HashMap<String, String>,
    pub message: DynMessage,
    pub target: Pid,
    pub sender: Option<Pid>,
    pub serializer_id: i32,
}

/// One coalesced mailbox batch, delivered to the endpoint writer as a single
/// user-message invocation.
pub(crate) struct EndpointWriterBatch(pub Vec<RemoteDeliver>);

/// Published on the event stream when an endpoint's transport is up.
#[derive(Debug, Clone)]
pub struct EndpointConnectedEvent {
    pub address: String,
}

/// Published on the event stream when an endpoint's writer mailbox suspends
/// because the transport became unavailable.
#[derive(Debug, Clone)]
pub struct EndpointSuspendedEvent {
    pub address: String,
}

/// Published on the event stream when an endpoint is lost for good (retries
/// exhausted or the peer closed the stream).
#[derive(Debug, Clone)]
pub struct EndpointTerminatedEvent {
    pub address: String,
}

/// A local actor started watching a remote one.
pub(crate) struct RemoteWatch {
    pub watcher: Pid,
    pub watchee: Pid,
}

pub(crate) struct RemoteUnwatch {
    pub watcher: Pid,
    pub watchee: Pid,
}

/// The peer reported that a watched actor stopped.
pub(crate) struct RemoteTerminate {
    pub watcher: Pid,
    pub watchee: Pid,
}

/// Asks the endpoint manager to tear down every endpoint; pending
/// deliveries become dead letters. Answered with `ShutdownAck`.
pub(crate) struct ShutdownEndpoints;

pub(crate) struct ShutdownAck;

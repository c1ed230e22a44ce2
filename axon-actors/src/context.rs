use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axon_proto::actor::Terminated;
use axon_proto::Pid;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::actor::{Actor, ActorError};
use crate::future::FutureProcess;
use crate::mailbox::{InvokerHandle, MessageInvoker};
use crate::message::{MessageEnvelope, SystemMessage};
use crate::process::ActorProcess;
use crate::props::Props;
use crate::system::ActorSystem;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("process name {0} already exists")]
    NameAlreadyExists(Pid),
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("response could not be downcast to the requested type")]
    BadResponse,
}

/// Entry point for code living outside any actor: spawning, sending, and
/// request/response.
#[derive(Clone)]
pub struct RootContext {
    system: ActorSystem,
}

impl RootContext {
    pub(crate) fn new(system: ActorSystem) -> RootContext {
        RootContext { system }
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Spawns an actor under a generated name.
    pub fn spawn(&self, props: &Props) -> Result<Pid, SpawnError> {
        let name = self.system.process_registry().next_id();
        self.spawn_named(props, &name)
    }

    /// Spawns an actor under `name`. Fails if the name is already taken,
    /// reporting the existing PID.
    pub fn spawn_named(&self, props: &Props, name: &str) -> Result<Pid, SpawnError> {
        spawn(&self.system, props, name)
    }

    pub fn send(&self, target: &Pid, envelope: MessageEnvelope) {
        self.system
            .process_registry()
            .get(target)
            .send_user_message(target, envelope);
    }

    pub fn send_system(&self, target: &Pid, message: SystemMessage) {
        self.system
            .process_registry()
            .get(target)
            .send_system_message(target, message);
    }

    pub fn stop(&self, target: &Pid) {
        self.system.process_registry().get(target).stop(target);
    }

    /// Sends `message` to `target` with a one-shot future as the reply
    /// target, and awaits the response. An elapsed timeout surfaces as
    /// `RequestError::Timeout`; the in-flight send is not cancelled.
    pub async fn request_async<T, M>(
        &self,
        target: &Pid,
        message: M,
        timeout: Duration,
    ) -> Result<T, RequestError>
    where
        T: Any + Send + Sync,
        M: Any + Send + Sync,
    {
        let registry = self.system.process_registry();
        let (future_pid, future_process, response) = FutureProcess::new(registry.address());
        registry.add(&future_pid.id, Arc::new(future_process));
        let envelope = MessageEnvelope::new(message).with_sender(future_pid.clone());
        self.send(target, envelope);
        let outcome = tokio::time::timeout(timeout, response).await;
        registry.remove(&future_pid.id);
        match outcome {
            Ok(Ok(envelope)) => envelope
                .message
                .downcast::<T>()
                .map(|message| *message)
                .map_err(|_| RequestError::BadResponse),
            Ok(Err(_)) => Err(RequestError::BadResponse),
            Err(_) => Err(RequestError::Timeout),
        }
    }
}

pub(crate) fn spawn(system: &ActorSystem, props: &Props, name: &str) -> Result<Pid, SpawnError> {
    let pid = Pid::new(system.address(), name);
    let actor = props.produce();
    let context = ActorContext::new(system.clone(), pid.clone(), actor);
    let invoker: InvokerHandle = Arc::new(tokio::sync::Mutex::new(Box::new(context)));
    let mailbox = props.produce_mailbox(invoker, system);
    let process = Arc::new(ActorProcess::new(mailbox.clone()));
    if !system.process_registry().add(name, process) {
        return Err(SpawnError::NameAlreadyExists(pid));
    }
    mailbox.post_system_message(SystemMessage::Start);
    debug!(actor_pid = %pid, "spawned actor");
    Ok(pid)
}

/// Per-actor state threaded through every receive: the actor system, the
/// actor's own PID, the sender and header of the envelope being processed,
/// and the set of watchers to notify on termination.
pub struct ActorContext {
    system: ActorSystem,
    self_pid: Pid,
    actor: Option<Box<dyn Actor>>,
    sender: Option<Pid>,
    header: HashMap<String, String>,
    watchers: Vec<Pid>,
}

impl ActorContext {
    pub(crate) fn new(system: ActorSystem, self_pid: Pid, actor: Box<dyn Actor>) -> ActorContext {
        ActorContext {
            system,
            self_pid,
            actor: Some(actor),
            sender: None,
            header: HashMap::new(),
            watchers: Vec::new(),
        }
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub fn self_pid(&self) -> &Pid {
        &self.self_pid
    }

    /// The sender of the envelope currently being processed, if any.
    pub fn sender(&self) -> Option<&Pid> {
        self.sender.as_ref()
    }

    /// The header of the envelope currently being processed.
    pub fn header(&self) -> &HashMap<String, String> {
        &self.header
    }

    pub fn send(&self, target: &Pid, envelope: MessageEnvelope) {
        self.system.root().send(target, envelope);
    }

    /// Responds to the sender of the envelope currently being processed.
    pub fn respond(&self, message: impl Any + Send + Sync) {
        match &self.sender {
            Some(sender) => {
                let envelope =
                    MessageEnvelope::new(message).with_sender(self.self_pid.clone());
                self.system.root().send(sender, envelope);
            }
            None => warn!(actor_pid = %self.self_pid, "respond called without a sender"),
        }
    }

    pub fn spawn(&self, props: &Props) -> Result<Pid, SpawnError> {
        self.system.root().spawn(props)
    }

    pub fn spawn_named(&self, props: &Props, name: &str) -> Result<Pid, SpawnError> {
        self.system.root().spawn_named(props, name)
    }

    /// Starts observing `watchee`'s liveness. Works transparently for remote
    /// PIDs through address resolution.
    pub fn watch(&self, watchee: &Pid) {
        self.system
            .process_registry()
            .get(watchee)
            .send_system_message(watchee, SystemMessage::Watch(self.self_pid.clone()));
    }

    pub fn unwatch(&self, watchee: &Pid) {
        self.system
            .process_registry()
            .get(watchee)
            .send_system_message(watchee, SystemMessage::Unwatch(self.self_pid.clone()));
    }

    pub fn stop(&self, target: &Pid) {
        self.system.root().stop(target);
    }

    pub fn stop_self(&self) {
        match self.system.process_registry().get_local(&self.self_pid.id) {
            Some(process) => process.stop(&self.self_pid),
            None => debug!(actor_pid = %self.self_pid, "stop_self on unregistered actor"),
        }
    }

    async fn receive(&mut self, envelope: MessageEnvelope) -> Result<(), ActorError> {
        let mut actor = match self.actor.take() {
            Some(actor) => actor,
            None => return Ok(()),
        };
        self.sender = envelope.sender.clone();
        self.header = envelope.header.clone();
        let result = actor.receive(self, envelope).await;
        self.actor = Some(actor);
        result
    }

    async fn handle_start(&mut self) -> Result<(), ActorError> {
        let mut actor = match self.actor.take() {
            Some(actor) => actor,
            None => return Ok(()),
        };
        let result = actor.started(self).await;
        self.actor = Some(actor);
        result
    }

    async fn handle_stop(&mut self) -> Result<(), ActorError> {
        if let Some(mut actor) = self.actor.take() {
            if let Err(error) = actor.stopped(self).await {
                warn!(actor_pid = %self.self_pid, "stopped hook failed: {}", error);
            }
        }
        self.system.process_registry().remove(&self.self_pid.id);
        let terminated = Terminated {
            who: Some(self.self_pid.clone()),
            address_terminated: false,
        };
        for watcher in self.watchers.drain(..) {
            self.system
                .process_registry()
                .get(&watcher)
                .send_system_message(&watcher, SystemMessage::Terminated(terminated.clone()));
        }
        debug!(actor_pid = %self.self_pid, "actor stopped");
        Ok(())
    }
}

#[async_trait]
impl MessageInvoker for ActorContext {
    async fn invoke_system_message(&mut self, message: SystemMessage) -> Result<(), ActorError> {
        match message {
            SystemMessage::Start => self.handle_start().await,
            SystemMessage::Stop => self.handle_stop().await,
            SystemMessage::Watch(watcher) => {
                if !self.watchers.contains(&watcher) {
                    self.watchers.push(watcher);
                }
                Ok(())
            }
            SystemMessage::Unwatch(watcher) => {
                self.watchers.retain(|known| known != &watcher);
                Ok(())
            }
            SystemMessage::Terminated(terminated) => {
                // Termination notices surface through the regular receive.
                self.receive(MessageEnvelope::new(terminated)).await
            }
            SystemMessage::SuspendMailbox | SystemMessage::ResumeMailbox => Ok(()),
        }
    }

    async fn invoke_user_message(&mut self, envelope: MessageEnvelope) -> Result<(), ActorError> {
        self.receive(envelope).await
    }

    async fn escalate_failure(&mut self, error: ActorError) {
        error!(actor_pid = %self.self_pid, "actor failure, stopping: {}", error);
        self.stop_self();
    }
}

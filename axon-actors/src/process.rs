use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use axon_proto::Pid;
use tracing::debug;

use crate::event_stream::EventStream;
use crate::mailbox::Mailbox;
use crate::message::{DynMessage, MessageEnvelope, SystemMessage};

/// The address a node carries before remoting assigns it a real one. PIDs
/// with this address always resolve locally.
pub const LOCAL_ADDRESS: &str = "nonhost";

/// Anything a PID can resolve to: a local actor, a one-shot future, a remote
/// proxy, or the dead letter sink.
pub trait Process: Send + Sync {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope);
    fn send_system_message(&self, pid: &Pid, message: SystemMessage);
    fn stop(&self, pid: &Pid) {
        self.send_system_message(pid, SystemMessage::Stop);
    }
}

/// Published on the event stream whenever a message cannot be delivered.
pub struct DeadLetterEvent {
    pub target: Pid,
    pub message: DynMessage,
    pub sender: Option<Pid>,
}

/// Sink for messages whose target cannot be resolved.
pub struct DeadLetterProcess {
    event_stream: Arc<EventStream>,
}

impl DeadLetterProcess {
    pub fn new(event_stream: Arc<EventStream>) -> DeadLetterProcess {
        DeadLetterProcess { event_stream }
    }
}

impl Process for DeadLetterProcess {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope) {
        debug!(target_pid = %pid, "dead letter");
        self.event_stream.publish(DeadLetterEvent {
            target: pid.clone(),
            message: envelope.message,
            sender: envelope.sender,
        });
    }

    fn send_system_message(&self, pid: &Pid, message: SystemMessage) {
        debug!(target_pid = %pid, "dropping system message {:?} for dead process", message);
    }
}

/// A local actor reachable through its mailbox.
pub(crate) struct ActorProcess {
    mailbox: Arc<dyn Mailbox>,
}

impl ActorProcess {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> ActorProcess {
        ActorProcess { mailbox }
    }
}

impl Process for ActorProcess {
    fn send_user_message(&self, _pid: &Pid, envelope: MessageEnvelope) {
        self.mailbox.post_user_message(envelope);
    }

    fn send_system_message(&self, _pid: &Pid, message: SystemMessage) {
        self.mailbox.post_system_message(message);
    }
}

pub type AddressResolver = Arc<dyn Fn(&Pid) -> Option<Arc<dyn Process>> + Send + Sync>;

/// Maps actor ids to local processes and decides local-vs-remote by
/// comparing a PID's address to this node's. Remote addresses go through the
/// registered resolvers (the remoting layer installs one); anything
/// unresolvable lands in dead letters.
pub struct ProcessRegistry {
    address: RwLock<String>,
    local: RwLock<HashMap<String, Arc<dyn Process>>>,
    resolvers: RwLock<Vec<AddressResolver>>,
    sequence: AtomicU64,
    dead_letter: Arc<DeadLetterProcess>,
}

impl ProcessRegistry {
    pub fn new(event_stream: Arc<EventStream>) -> ProcessRegistry {
        ProcessRegistry {
            address: RwLock::new(LOCAL_ADDRESS.to_string()),
            local: RwLock::new(HashMap::new()),
            resolvers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            dead_letter: Arc::new(DeadLetterProcess::new(event_stream)),
        }
    }

    pub fn address(&self) -> String {
        self.address.read().unwrap().clone()
    }

    pub fn set_address(&self, address: impl Into<String>) {
        *self.address.write().unwrap() = address.into();
    }

    /// Generates a fresh process name (`$1`, `$2`, ...).
    pub fn next_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("${}", sequence)
    }

    /// Registers a process under `id`. Returns false if the name is taken.
    pub fn add(&self, id: &str, process: Arc<dyn Process>) -> bool {
        let mut local = self.local.write().unwrap();
        if local.contains_key(id) {
            return false;
        }
        local.insert(id.to_string(), process);
        true
    }

    pub fn remove(&self, id: &str) {
        self.local.write().unwrap().remove(id);
    }

    pub fn get_local(&self, id: &str) -> Option<Arc<dyn Process>> {
        self.local.read().unwrap().get(id).cloned()
    }

    /// Installed by the remoting layer to resolve non-local addresses.
    pub fn register_resolver(&self, resolver: AddressResolver) {
        self.resolvers.write().unwrap().push(resolver);
    }

    pub fn is_local(&self, pid: &Pid) -> bool {
        pid.address == LOCAL_ADDRESS || pid.address == self.address()
    }

    /// Resolves a PID to a process. Never fails: unresolvable PIDs resolve
    /// to the dead letter sink.
    pub fn get(&self, pid: &Pid) -> Arc<dyn Process> {
        if self.is_local(pid) {
            return match self.get_local(&pid.id) {
                Some(process) => process,
                None => self.dead_letter.clone(),
            };
        }
        for resolver in self.resolvers.read().unwrap().iter() {
            if let Some(process) = resolver(pid) {
                return process;
            }
        }
        self.dead_letter.clone()
    }
}

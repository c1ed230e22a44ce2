use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use axon_proto::actor::Terminated;
use axon_proto::Pid;

/// A dynamically typed actor message.
///
/// Messages cross the local/remote boundary, so they are type-erased here
/// and recovered by downcast in each actor's receive.
pub type DynMessage = Box<dyn Any + Send + Sync>;

/// The unit delivered to an actor: the message itself, the sender to respond
/// to (if any), and an ordered header bag.
pub struct MessageEnvelope {
    pub message: DynMessage,
    pub sender: Option<Pid>,
    pub header: HashMap<String, String>,
}

impl MessageEnvelope {
    pub fn new(message: impl Any + Send + Sync) -> MessageEnvelope {
        MessageEnvelope::from_boxed(Box::new(message))
    }

    pub fn from_boxed(message: DynMessage) -> MessageEnvelope {
        MessageEnvelope {
            message,
            sender: None,
            header: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, sender: Pid) -> MessageEnvelope {
        self.sender = Some(sender);
        self
    }

    pub fn with_header(mut self, header: HashMap<String, String>) -> MessageEnvelope {
        self.header = header;
        self
    }

    /// Peeks at the message as a `T`, without consuming the envelope.
    pub fn message_as<T: Any>(&self) -> Option<&T> {
        self.message.downcast_ref::<T>()
    }
}

impl fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageEnvelope(sender: {:?})", self.sender)
    }
}

/// System messages have priority over user messages and are processed even
/// while a mailbox is suspended.
#[derive(Debug, Clone)]
pub enum SystemMessage {
    Start,
    Stop,
    Watch(Pid),
    Unwatch(Pid),
    Terminated(Terminated),
    SuspendMailbox,
    ResumeMailbox,
}

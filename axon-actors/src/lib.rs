//! A small local actor kernel: dynamically typed messages, per-actor
//! mailboxes with a single-consumer scheduling gate, a process registry, and
//! request/response futures. The remoting layer plugs into the seams exposed
//! here (the `Mailbox` trait, the registry's address resolvers, and the
//! event stream).

mod actor;
mod context;
mod event_stream;
mod future;
mod mailbox;
mod message;
mod process;
mod props;
mod system;

pub use crate::actor::{Actor, ActorError};
pub use crate::context::{ActorContext, RequestError, RootContext, SpawnError};
pub use crate::event_stream::EventStream;
pub use crate::mailbox::{
    DefaultMailbox, InvokerHandle, Mailbox, MessageInvoker, MAILBOX_BUSY, MAILBOX_IDLE,
};
pub use crate::message::{DynMessage, MessageEnvelope, SystemMessage};
pub use crate::process::{
    AddressResolver, DeadLetterEvent, DeadLetterProcess, Process, ProcessRegistry, LOCAL_ADDRESS,
};
pub use crate::props::{MailboxProducer, Props};
pub use crate::system::ActorSystem;

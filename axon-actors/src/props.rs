use std::sync::Arc;

use crate::actor::Actor;
use crate::mailbox::{DefaultMailbox, InvokerHandle, Mailbox};
use crate::system::ActorSystem;

pub type ActorProducer = Arc<dyn Fn() -> Box<dyn Actor> + Send + Sync>;
pub type MailboxProducer =
    Arc<dyn Fn(InvokerHandle, &ActorSystem) -> Arc<dyn Mailbox> + Send + Sync>;

/// A recipe for spawning an actor: how to build the actor instance and,
/// optionally, a custom mailbox. Cheap to clone; `remote_kinds` maps kind
/// names to `Props`.
#[derive(Clone)]
pub struct Props {
    producer: ActorProducer,
    mailbox_producer: Option<MailboxProducer>,
}

impl Props {
    pub fn from_producer<F>(producer: F) -> Props
    where
        F: Fn() -> Box<dyn Actor> + Send + Sync + 'static,
    {
        Props {
            producer: Arc::new(producer),
            mailbox_producer: None,
        }
    }

    /// Replaces the default mailbox. The remoting layer uses this to install
    /// its batching endpoint writer mailbox.
    pub fn with_mailbox<F>(mut self, mailbox_producer: F) -> Props
    where
        F: Fn(InvokerHandle, &ActorSystem) -> Arc<dyn Mailbox> + Send + Sync + 'static,
    {
        self.mailbox_producer = Some(Arc::new(mailbox_producer));
        self
    }

    pub(crate) fn produce(&self) -> Box<dyn Actor> {
        (self.producer)()
    }

    pub(crate) fn produce_mailbox(
        &self,
        invoker: InvokerHandle,
        system: &ActorSystem,
    ) -> Arc<dyn Mailbox> {
        match &self.mailbox_producer {
            Some(producer) => producer(invoker, system),
            None => DefaultMailbox::create(invoker),
        }
    }
}

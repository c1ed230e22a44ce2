use std::sync::Arc;

use crate::context::RootContext;
use crate::event_stream::EventStream;
use crate::process::ProcessRegistry;

/// The process-wide actor system: process registry plus event stream. It is
/// a plain container handed to components at construction; nothing here is a
/// global.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<ActorSystemInner>,
}

struct ActorSystemInner {
    process_registry: ProcessRegistry,
    event_stream: Arc<EventStream>,
}

impl ActorSystem {
    pub fn new() -> ActorSystem {
        let event_stream = Arc::new(EventStream::default());
        ActorSystem {
            inner: Arc::new(ActorSystemInner {
                process_registry: ProcessRegistry::new(event_stream.clone()),
                event_stream,
            }),
        }
    }

    pub fn root(&self) -> RootContext {
        RootContext::new(self.clone())
    }

    pub fn process_registry(&self) -> &ProcessRegistry {
        &self.inner.process_registry
    }

    pub fn event_stream(&self) -> &Arc<EventStream> {
        &self.inner.event_stream
    }

    /// This node's advertised address (`nonhost` until remoting starts).
    pub fn address(&self) -> String {
        self.inner.process_registry.address()
    }
}

impl Default for ActorSystem {
    fn default() -> ActorSystem {
        ActorSystem::new()
    }
}

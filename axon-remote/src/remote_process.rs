use std::collections::HashMap;
use std::sync::Arc;

use axon_actors::{ActorSystem, MessageEnvelope, Process, SystemMessage};
use axon_proto::actor::Stop;
use axon_proto::Pid;
use tracing::debug;

use crate::messages::{RemoteDeliver, RemoteUnwatch, RemoteWatch};
use crate::serialization::SerializerRegistry;

/// What a PID with a non-local address resolves to. User messages become
/// `RemoteDeliver`s routed through the endpoint manager; watch-related
/// system messages become watch-registry traffic; `Stop` and `Terminated`
/// travel as wire control messages.
pub(crate) struct RemoteProcess {
    system: ActorSystem,
    manager: Pid,
    serialization: Arc<SerializerRegistry>,
}

impl RemoteProcess {
    pub fn new(
        system: ActorSystem,
        manager: Pid,
        serialization: Arc<SerializerRegistry>,
    ) -> RemoteProcess {
        RemoteProcess {
            system,
            manager,
            serialization,
        }
    }

    fn deliver(
        &self,
        target: &Pid,
        message: axon_actors::DynMessage,
        sender: Option<Pid>,
        header: HashMap<String, String>,
    ) {
        let serializer_id = self.serialization.serializer_id_for(message.as_ref());
        let deliver = RemoteDeliver {
            header,
            message,
            target: target.clone(),
            sender,
            serializer_id,
        };
        self.system
            .root()
            .send(&self.manager, MessageEnvelope::from_boxed(Box::new(deliver)));
    }
}

impl Process for RemoteProcess {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope) {
        self.deliver(pid, envelope.message, envelope.sender, envelope.header);
    }

    fn send_system_message(&self, pid: &Pid, message: SystemMessage) {
        match message {
            SystemMessage::Watch(watcher) => {
                let watch = RemoteWatch {
                    watcher,
                    watchee: pid.clone(),
                };
                self.system
                    .root()
                    .send(&self.manager, MessageEnvelope::from_boxed(Box::new(watch)));
            }
            SystemMessage::Unwatch(watcher) => {
                let unwatch = RemoteUnwatch {
                    watcher,
                    watchee: pid.clone(),
                };
                self.system
                    .root()
                    .send(&self.manager, MessageEnvelope::from_boxed(Box::new(unwatch)));
            }
            SystemMessage::Stop => {
                self.deliver(pid, Box::new(Stop {}), None, HashMap::new());
            }
            SystemMessage::Terminated(terminated) => {
                // Notify a remote watcher that a local actor stopped.
                self.deliver(pid, Box::new(terminated), None, HashMap::new());
            }
            other => {
                debug!(target_pid = %pid, "dropping system message {:?} for remote pid", other)
            }
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use axon_actors::{Actor, ActorContext, ActorError, MessageEnvelope, Props, SpawnError};
use axon_proto::remote::{ActorPidRequest, ActorPidResponse, ResponseStatusCode};
use tracing::{debug, warn};

use crate::config::RemoteConfig;

/// The name every node registers its activator under; remote spawn requests
/// are addressed to it.
pub const ACTIVATOR_NAME: &str = "activator";

/// Serves `ActorPidRequest`s from peers: looks the kind up in
/// `remote_kinds`, spawns under the requested name (or a generated one when
/// empty), and answers with the resulting PID and status code.
pub(crate) struct Activator {
    config: Arc<RemoteConfig>,
}

pub(crate) fn activator_props(config: Arc<RemoteConfig>) -> Props {
    Props::from_producer(move || {
        Box::new(Activator {
            config: config.clone(),
        })
    })
}

impl Activator {
    fn handle_request(&self, ctx: &ActorContext, request: &ActorPidRequest) -> ActorPidResponse {
        let props = match self.config.remote_kinds.get(&request.kind) {
            Some(props) => props,
            None => {
                warn!(kind = %request.kind, "spawn request for unknown kind");
                return ActorPidResponse {
                    pid: None,
                    status_code: ResponseStatusCode::Error as i32,
                };
            }
        };
        let name = if request.name.is_empty() {
            ctx.system().process_registry().next_id()
        } else {
            request.name.clone()
        };
        match ctx.spawn_named(props, &name) {
            Ok(pid) => {
                debug!(kind = %request.kind, actor_pid = %pid, "activated");
                ActorPidResponse {
                    pid: Some(pid),
                    status_code: ResponseStatusCode::Ok as i32,
                }
            }
            Err(SpawnError::NameAlreadyExists(existing)) => ActorPidResponse {
                pid: Some(existing),
                status_code: ResponseStatusCode::ProcessNameAlreadyExist as i32,
            },
        }
    }
}

#[async_trait]
impl Actor for Activator {
    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(request) = envelope.message_as::<ActorPidRequest>() {
            let response = self.handle_request(ctx, request);
            ctx.respond(response);
        }
        Ok(())
    }
}

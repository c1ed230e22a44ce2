use async_trait::async_trait;
use thiserror::Error;

use crate::context::ActorContext;
use crate::message::MessageEnvelope;

#[derive(Error, Debug)]
pub enum ActorError {
    /// The actor asked to stop after the current message.
    #[error("actor requested stop")]
    Stopped,
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

/// An actor processes one envelope at a time from its mailbox.
///
/// While processing a message, the actor typically
/// - updates its state,
/// - sends messages to other actors, spawns children, or responds to the
///   sender recorded in the envelope.
///
/// Messages are dynamically typed; a receive implementation dispatches by
/// downcasting the envelope's message.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Called once, before the first envelope.
    async fn started(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor stops, before watchers are notified.
    async fn stopped(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError>;
}

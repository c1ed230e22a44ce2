use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axon_actors::{
    ActorError, DeadLetterEvent, EventStream, InvokerHandle, Mailbox, MessageEnvelope,
    MessageInvoker, SystemMessage, MAILBOX_BUSY, MAILBOX_IDLE,
};
use tracing::warn;

use crate::messages::{
    EndpointSuspendedEvent, EndpointTerminatedEvent, EndpointWriterBatch, RemoteDeliver,
};

/// The endpoint writer's mailbox: system and user FIFO queues gated by an
/// atomic Idle/Busy status word, with user messages coalesced into batches
/// of up to `batch_size` per invocation.
///
/// The mailbox starts suspended; the writer lifts the suspension once its
/// stream to the peer is up. While suspended, user messages stay queued and
/// system messages keep flowing. A run processes at most one system message,
/// then one batch, then flips back to Idle and re-schedules itself when
/// `system-nonempty || (user-nonempty && !suspended)`.
pub struct EndpointWriterMailbox {
    inner: Arc<MailboxInner>,
}

struct MailboxInner {
    address: String,
    batch_size: usize,
    user_tx: flume::Sender<MessageEnvelope>,
    user_rx: flume::Receiver<MessageEnvelope>,
    system_tx: flume::Sender<SystemMessage>,
    system_rx: flume::Receiver<SystemMessage>,
    status: AtomicUsize,
    suspended: AtomicBool,
    stopped: AtomicBool,
    invoker: InvokerHandle,
    event_stream: Arc<EventStream>,
}

impl EndpointWriterMailbox {
    pub fn create(
        invoker: InvokerHandle,
        event_stream: Arc<EventStream>,
        batch_size: usize,
        address: String,
    ) -> Arc<dyn Mailbox> {
        let (user_tx, user_rx) = flume::unbounded();
        let (system_tx, system_rx) = flume::unbounded();
        Arc::new(EndpointWriterMailbox {
            inner: Arc::new(MailboxInner {
                address,
                batch_size,
                user_tx,
                user_rx,
                system_tx,
                system_rx,
                status: AtomicUsize::new(MAILBOX_IDLE),
                suspended: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                invoker,
                event_stream,
            }),
        })
    }
}

impl Mailbox for EndpointWriterMailbox {
    fn post_user_message(&self, envelope: MessageEnvelope) {
        if self.inner.stopped.load(Ordering::Relaxed) {
            dead_letter(&self.inner.event_stream, envelope);
            return;
        }
        let _ = self.inner.user_tx.send(envelope);
        schedule(&self.inner);
    }

    fn post_system_message(&self, message: SystemMessage) {
        let _ = self.inner.system_tx.send(message);
        schedule(&self.inner);
    }
}

fn schedule(inner: &Arc<MailboxInner>) {
    if inner
        .status
        .compare_exchange(MAILBOX_IDLE, MAILBOX_BUSY, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        let inner = inner.clone();
        tokio::spawn(run(inner));
    }
}

async fn run(inner: Arc<MailboxInner>) {
    let mut invoker = inner.invoker.lock().await;
    loop {
        process_one_run(&inner, invoker.as_mut()).await;
        inner.status.store(MAILBOX_IDLE, Ordering::Release);
        let runnable = !inner.system_rx.is_empty()
            || (!inner.user_rx.is_empty() && !inner.suspended.load(Ordering::Relaxed));
        if !runnable || inner.stopped.load(Ordering::Relaxed) {
            return;
        }
        if inner
            .status
            .compare_exchange(MAILBOX_IDLE, MAILBOX_BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
    }
}

async fn process_one_run(inner: &MailboxInner, invoker: &mut (dyn MessageInvoker + 'static)) {
    if let Ok(system_message) = inner.system_rx.try_recv() {
        match &system_message {
            SystemMessage::SuspendMailbox => suspend(inner),
            SystemMessage::ResumeMailbox => inner.suspended.store(false, Ordering::Relaxed),
            SystemMessage::Stop => {
                inner.stopped.store(true, Ordering::Relaxed);
                drain_to_dead_letters(inner);
            }
            _ => {}
        }
        if let Err(error) = invoker.invoke_system_message(system_message).await {
            invoker.escalate_failure(error).await;
        }
    }
    if inner.suspended.load(Ordering::Relaxed) || inner.stopped.load(Ordering::Relaxed) {
        return;
    }
    let mut batch: Vec<RemoteDeliver> = Vec::new();
    let mut individual: Option<MessageEnvelope> = None;
    while batch.len() < inner.batch_size {
        let envelope = match inner.user_rx.try_recv() {
            Ok(envelope) => envelope,
            Err(_) => break,
        };
        if envelope.message.is::<EndpointTerminatedEvent>() {
            // Delivered on its own, never inside a batch.
            individual = Some(envelope);
            break;
        }
        match envelope.message.downcast::<RemoteDeliver>() {
            Ok(deliver) => batch.push(*deliver),
            Err(_) => warn!("endpoint writer mailbox dropping unexpected user message"),
        }
    }
    if !batch.is_empty() {
        let envelope = MessageEnvelope::new(EndpointWriterBatch(batch));
        invoke_user(inner, invoker, envelope).await;
    }
    if let Some(envelope) = individual {
        invoke_user(inner, invoker, envelope).await;
    }
}

async fn invoke_user(
    inner: &MailboxInner,
    invoker: &mut (dyn MessageInvoker + 'static),
    envelope: MessageEnvelope,
) {
    if let Err(error) = invoker.invoke_user_message(envelope).await {
        if is_unavailable(&error) {
            warn!(
                peer = %inner.address,
                "endpoint transport unavailable, suspending writer mailbox"
            );
            suspend(inner);
        } else {
            invoker.escalate_failure(error).await;
        }
    }
}

fn suspend(inner: &MailboxInner) {
    if !inner.suspended.swap(true, Ordering::Relaxed) {
        inner.event_stream.publish(EndpointSuspendedEvent {
            address: inner.address.clone(),
        });
    }
}

fn is_unavailable(error: &ActorError) -> bool {
    match error {
        ActorError::Failure(failure) => failure
            .downcast_ref::<tonic::Status>()
            .map(|status| status.code() == tonic::Code::Unavailable)
            .unwrap_or(false),
        _ => false,
    }
}

/// Publishes every queued `RemoteDeliver` as a dead letter. Invoked when the
/// writer stops with messages still pending.
fn drain_to_dead_letters(inner: &MailboxInner) {
    while let Ok(envelope) = inner.user_rx.try_recv() {
        dead_letter(&inner.event_stream, envelope);
    }
}

fn dead_letter(event_stream: &EventStream, envelope: MessageEnvelope) {
    if let Ok(deliver) = envelope.message.downcast::<RemoteDeliver>() {
        let deliver = *deliver;
        event_stream.publish(DeadLetterEvent {
            target: deliver.target,
            message: deliver.message,
            sender: deliver.sender,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axon_actors::{
        ActorError, DeadLetterEvent, EventStream, InvokerHandle, MessageEnvelope, MessageInvoker,
        SystemMessage,
    };
    use axon_proto::Pid;

    use super::EndpointWriterMailbox;
    use crate::messages::{
        EndpointSuspendedEvent, EndpointTerminatedEvent, EndpointWriterBatch, RemoteDeliver,
    };

    #[derive(Debug, Clone, PartialEq)]
    enum Invocation {
        System(String),
        Batch(Vec<String>),
        Terminated,
    }

    struct RecordingInvoker {
        invocations: flume::Sender<Invocation>,
    }

    #[async_trait]
    impl MessageInvoker for RecordingInvoker {
        async fn invoke_system_message(
            &mut self,
            message: SystemMessage,
        ) -> Result<(), ActorError> {
            let _ = self
                .invocations
                .send(Invocation::System(format!("{:?}", message)));
            Ok(())
        }

        async fn invoke_user_message(
            &mut self,
            envelope: MessageEnvelope,
        ) -> Result<(), ActorError> {
            if envelope.message.is::<EndpointTerminatedEvent>() {
                let _ = self.invocations.send(Invocation::Terminated);
                return Ok(());
            }
            let batch = envelope
                .message
                .downcast::<EndpointWriterBatch>()
                .expect("only batches and terminated events are expected");
            let ids = batch.0.iter().map(|deliver| deliver.target.id.clone()).collect();
            let _ = self.invocations.send(Invocation::Batch(ids));
            Ok(())
        }

        async fn escalate_failure(&mut self, _error: ActorError) {}
    }

    fn mailbox_with_recorder(
        batch_size: usize,
        event_stream: Arc<EventStream>,
    ) -> (Arc<dyn axon_actors::Mailbox>, flume::Receiver<Invocation>) {
        let (invocations_tx, invocations_rx) = flume::unbounded();
        let invoker: InvokerHandle = Arc::new(tokio::sync::Mutex::new(Box::new(
            RecordingInvoker {
                invocations: invocations_tx,
            },
        )));
        let mailbox =
            EndpointWriterMailbox::create(invoker, event_stream, batch_size, "peer:9000".to_string());
        (mailbox, invocations_rx)
    }

    fn deliver(id: &str) -> MessageEnvelope {
        MessageEnvelope::from_boxed(Box::new(RemoteDeliver {
            header: HashMap::new(),
            message: Box::new(id.to_string()),
            target: Pid::new("peer:9000", id),
            sender: None,
            serializer_id: 0,
        }))
    }

    async fn next_invocation(invocations: &flume::Receiver<Invocation>) -> Invocation {
        tokio::time::timeout(Duration::from_secs(1), invocations.recv_async())
            .await
            .expect("invocation expected")
            .expect("invoker channel closed")
    }

    #[tokio::test]
    async fn test_batches_coalesce_up_to_batch_size() {
        let (mailbox, invocations) = mailbox_with_recorder(2, Arc::new(EventStream::default()));
        mailbox.post_system_message(SystemMessage::ResumeMailbox);
        for id in ["a", "b", "c", "d", "e"].iter() {
            mailbox.post_user_message(deliver(id));
        }
        assert!(matches!(
            next_invocation(&invocations).await,
            Invocation::System(_)
        ));
        let mut delivered = Vec::new();
        while delivered.len() < 5 {
            match next_invocation(&invocations).await {
                Invocation::Batch(ids) => {
                    assert!(ids.len() <= 2, "batch exceeded its size limit: {:?}", ids);
                    delivered.extend(ids);
                }
                other => panic!("unexpected invocation {:?}", other),
            }
        }
        assert_eq!(delivered, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_user_messages_wait_while_suspended() {
        let (mailbox, invocations) = mailbox_with_recorder(4, Arc::new(EventStream::default()));
        // The mailbox starts suspended: user messages must stay queued while
        // system messages keep flowing.
        mailbox.post_user_message(deliver("queued"));
        mailbox.post_system_message(SystemMessage::Start);
        assert_eq!(
            next_invocation(&invocations).await,
            Invocation::System("Start".to_string())
        );
        assert!(invocations.try_recv().is_err());
        mailbox.post_system_message(SystemMessage::ResumeMailbox);
        assert!(matches!(
            next_invocation(&invocations).await,
            Invocation::System(_)
        ));
        assert_eq!(
            next_invocation(&invocations).await,
            Invocation::Batch(vec!["queued".to_string()])
        );
    }

    #[tokio::test]
    async fn test_terminated_event_is_not_batched() {
        let (mailbox, invocations) = mailbox_with_recorder(10, Arc::new(EventStream::default()));
        mailbox.post_user_message(deliver("a"));
        mailbox.post_user_message(deliver("b"));
        mailbox.post_user_message(MessageEnvelope::new(EndpointTerminatedEvent {
            address: "peer:9000".to_string(),
        }));
        mailbox.post_user_message(deliver("c"));
        mailbox.post_system_message(SystemMessage::ResumeMailbox);
        assert!(matches!(
            next_invocation(&invocations).await,
            Invocation::System(_)
        ));
        // The partial batch ahead of the event flushes first, then the event
        // rides alone, then the remainder.
        assert_eq!(
            next_invocation(&invocations).await,
            Invocation::Batch(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(next_invocation(&invocations).await, Invocation::Terminated);
        assert_eq!(
            next_invocation(&invocations).await,
            Invocation::Batch(vec!["c".to_string()])
        );
    }

    #[tokio::test]
    async fn test_suspension_publishes_a_single_event() {
        let event_stream = Arc::new(EventStream::default());
        let events = event_stream.subscribe();
        let (mailbox, invocations) = mailbox_with_recorder(4, event_stream);
        mailbox.post_system_message(SystemMessage::ResumeMailbox);
        mailbox.post_system_message(SystemMessage::SuspendMailbox);
        mailbox.post_system_message(SystemMessage::SuspendMailbox);
        for _ in 0..3 {
            assert!(matches!(
                next_invocation(&invocations).await,
                Invocation::System(_)
            ));
        }
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv_async())
            .await
            .expect("suspension event expected")
            .unwrap();
        let suspended = event
            .downcast_ref::<EndpointSuspendedEvent>()
            .expect("expected a suspension event");
        assert_eq!(suspended.address, "peer:9000");
        // Suspending an already-suspended mailbox must not re-publish.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_drains_pending_deliveries_to_dead_letters() {
        let event_stream = Arc::new(EventStream::default());
        let dead_letters = event_stream.subscribe();
        let (mailbox, invocations) = mailbox_with_recorder(10, event_stream);
        for id in ["a", "b", "c"].iter() {
            mailbox.post_user_message(deliver(id));
        }
        mailbox.post_system_message(SystemMessage::Stop);
        assert_eq!(
            next_invocation(&invocations).await,
            Invocation::System("Stop".to_string())
        );
        let mut targets = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(1), dead_letters.recv_async())
                .await
                .expect("dead letter expected")
                .expect("event stream closed");
            let dead_letter = event
                .downcast_ref::<DeadLetterEvent>()
                .expect("expected a dead letter");
            targets.push(dead_letter.target.id.clone());
        }
        assert_eq!(targets, vec!["a", "b", "c"]);
    }
}

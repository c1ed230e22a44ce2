use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::actor::ActorError;
use crate::message::{MessageEnvelope, SystemMessage};

pub const MAILBOX_IDLE: usize = 0;
pub const MAILBOX_BUSY: usize = 1;

/// A mailbox accepts envelopes from any number of producers and feeds them,
/// one scheduled run at a time, to its message invoker.
pub trait Mailbox: Send + Sync {
    fn post_user_message(&self, envelope: MessageEnvelope);
    fn post_system_message(&self, message: SystemMessage);
}

/// The consumer side of a mailbox. Exactly one invocation is in flight per
/// mailbox; the scheduling gate guarantees it.
#[async_trait]
pub trait MessageInvoker: Send {
    async fn invoke_system_message(&mut self, message: SystemMessage) -> Result<(), ActorError>;
    async fn invoke_user_message(&mut self, envelope: MessageEnvelope) -> Result<(), ActorError>;
    async fn escalate_failure(&mut self, error: ActorError);
}

pub type InvokerHandle = Arc<tokio::sync::Mutex<Box<dyn MessageInvoker>>>;

/// How many user messages a single scheduled run may process before yielding
/// the worker back to the runtime.
const DEFAULT_THROUGHPUT: usize = 300;

/// The default mailbox: two unbounded FIFO queues (system and user) gated by
/// an atomic Idle/Busy status word. `schedule` CAS-es Idle -> Busy and
/// submits one run; the run drains system messages first, honors the
/// suspended flag, processes user messages up to the throughput limit, then
/// flips back to Idle and re-schedules itself if anything is left.
pub struct DefaultMailbox {
    inner: Arc<MailboxInner>,
}

struct MailboxInner {
    user_tx: flume::Sender<MessageEnvelope>,
    user_rx: flume::Receiver<MessageEnvelope>,
    system_tx: flume::Sender<SystemMessage>,
    system_rx: flume::Receiver<SystemMessage>,
    status: AtomicUsize,
    suspended: AtomicBool,
    stopped: AtomicBool,
    invoker: InvokerHandle,
}

impl DefaultMailbox {
    pub fn create(invoker: InvokerHandle) -> Arc<dyn Mailbox> {
        let (user_tx, user_rx) = flume::unbounded();
        let (system_tx, system_rx) = flume::unbounded();
        Arc::new(DefaultMailbox {
            inner: Arc::new(MailboxInner {
                user_tx,
                user_rx,
                system_tx,
                system_rx,
                status: AtomicUsize::new(MAILBOX_IDLE),
                suspended: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                invoker,
            }),
        })
    }
}

impl Mailbox for DefaultMailbox {
    fn post_user_message(&self, envelope: MessageEnvelope) {
        if self.inner.stopped.load(Ordering::Relaxed) {
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
        process_messages(&inner, invoker.as_mut()).await;
        inner.status.store(MAILBOX_IDLE, Ordering::Release);
        if !runnable(&inner) {
            return;
        }
        if inner
            .status
            .compare_exchange(MAILBOX_IDLE, MAILBOX_BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another producer won the race; their run will pick it up.
            return;
        }
    }
}

fn runnable(inner: &MailboxInner) -> bool {
    if inner.stopped.load(Ordering::Relaxed) {
        return false;
    }
    !inner.system_rx.is_empty()
        || (!inner.user_rx.is_empty() && !inner.suspended.load(Ordering::Relaxed))
}

async fn process_messages(inner: &MailboxInner, invoker: &mut (dyn MessageInvoker + 'static)) {
    while let Ok(system_message) = inner.system_rx.try_recv() {
        match &system_message {
            SystemMessage::SuspendMailbox => inner.suspended.store(true, Ordering::Relaxed),
            SystemMessage::ResumeMailbox => inner.suspended.store(false, Ordering::Relaxed),
            SystemMessage::Stop => inner.stopped.store(true, Ordering::Relaxed),
            _ => {}
        }
        let stop = matches!(system_message, SystemMessage::Stop);
        if let Err(error) = invoker.invoke_system_message(system_message).await {
            invoker.escalate_failure(error).await;
        }
        if stop {
            return;
        }
    }
    if inner.suspended.load(Ordering::Relaxed) || inner.stopped.load(Ordering::Relaxed) {
        return;
    }
    let mut processed = 0;
    while processed < DEFAULT_THROUGHPUT {
        // System messages preempt the user queue.
        if !inner.system_rx.is_empty() {
            return;
        }
        let envelope = match inner.user_rx.try_recv() {
            Ok(envelope) => envelope,
            Err(_) => return,
        };
        processed += 1;
        if let Err(error) = invoker.invoke_user_message(envelope).await {
            match error {
                ActorError::Stopped => {
                    inner.stopped.store(true, Ordering::Relaxed);
                    if let Err(stop_error) = invoker.invoke_system_message(SystemMessage::Stop).await
                    {
                        invoker.escalate_failure(stop_error).await;
                    }
                    return;
                }
                other => {
                    warn!("user message processing failed: {}", other);
                    invoker.escalate_failure(other).await;
                    return;
                }
            }
        }
    }
}

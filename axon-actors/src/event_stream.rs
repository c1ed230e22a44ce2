use std::any::Any;
use std::sync::{Arc, Mutex};

/// Process-wide publish/subscribe bus. Events are type-erased; subscribers
/// downcast the ones they care about. Dead letters and endpoint lifecycle
/// events travel through here.
#[derive(Default)]
pub struct EventStream {
    subscribers: Mutex<Vec<flume::Sender<Arc<dyn Any + Send + Sync>>>>,
}

impl EventStream {
    /// Subscribes to every subsequent event. Dropping the receiver
    /// unsubscribes; closed subscriptions are pruned on publish.
    pub fn subscribe(&self) -> flume::Receiver<Arc<dyn Any + Send + Sync>> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish<E: Any + Send + Sync>(&self, event: E) {
        let event: Arc<dyn Any + Send + Sync> = Arc::new(event);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

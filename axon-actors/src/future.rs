use std::sync::Mutex;

use axon_proto::Pid;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::message::{MessageEnvelope, SystemMessage};
use crate::process::Process;

/// A one-shot reply target. `request_async` registers one under a generated
/// `future$<uuid>` id and hands its PID out as the sender; the first user
/// message delivered to it completes the request.
pub(crate) struct FutureProcess {
    completion: Mutex<Option<oneshot::Sender<MessageEnvelope>>>,
}

impl FutureProcess {
    pub fn new(address: String) -> (Pid, FutureProcess, oneshot::Receiver<MessageEnvelope>) {
        let (tx, rx) = oneshot::channel();
        let pid = Pid::new(address, format!("future${}", Uuid::new_v4().to_simple()));
        let process = FutureProcess {
            completion: Mutex::new(Some(tx)),
        };
        (pid, process, rx)
    }
}

impl Process for FutureProcess {
    fn send_user_message(&self, _pid: &Pid, envelope: MessageEnvelope) {
        if let Some(completion) = self.completion.lock().unwrap().take() {
            let _ = completion.send(envelope);
        }
    }

    fn send_system_message(&self, pid: &Pid, message: SystemMessage) {
        debug!(future_pid = %pid, "ignoring system message {:?} on future", message);
    }
}

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::types::RuntimeEvent;

#[derive(Default)]
pub(crate) struct RuntimePubSub {
    subscribers: Vec<Sender<RuntimeEvent>>,
}

impl RuntimePubSub {
    pub(crate) fn subscribe(&mut self) -> Receiver<RuntimeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn broadcast(&mut self, event: RuntimeEvent) {
        // Remove disconnected subscribers
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

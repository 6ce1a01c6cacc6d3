use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;
use crate::models::ProgressEvent;

/// Fan-out point between one session's commit and the connections watching it.
/// Events are logged so a reconnecting client can replay a commit, and the
/// percentage never goes backwards for the lifetime of a commit token.
#[derive(Default)]
pub struct EventHub {
    inner: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    log: Vec<ProgressEvent>,
    subscribers: Vec<(Uuid, UnboundedSender<ProgressEvent>)>,
    high_water: u8,
}

impl EventHub {
    pub fn emit(&self, mut event: ProgressEvent) {
        let mut state = self.inner.lock();
        event.progress = event.progress.max(state.high_water);
        state.high_water = event.progress;
        state.log.push(event.clone());
        state
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Attaches a connection. With `replay`, everything logged so far is sent
    /// first, under the same lock, so the stream has no gap and no repeat.
    /// A connection that is already attached is left as it is.
    pub fn subscribe(&self, connection: Uuid, tx: UnboundedSender<ProgressEvent>, replay: bool) {
        let mut state = self.inner.lock();
        if state.subscribers.iter().any(|(id, _)| *id == connection) {
            return;
        }
        if replay {
            for event in &state.log {
                if tx.send(event.clone()).is_err() {
                    return;
                }
            }
        }
        state.subscribers.push((connection, tx));
    }

    pub fn unsubscribe(&self, connection: Uuid) {
        self.inner.lock().subscribers.retain(|(id, _)| *id != connection);
    }

    pub fn has_subscribers(&self) -> bool {
        let mut state = self.inner.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        !state.subscribers.is_empty()
    }

    pub fn high_water(&self) -> u8 {
        self.inner.lock().high_water
    }

    /// Starts a new log for a re-run of the same token. The high-water mark
    /// stays, so the re-run never reports less than the first run did.
    pub fn restart(&self) {
        self.inner.lock().log.clear();
    }

    /// Starts a fresh log for a new commit token.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.log.clear();
        state.high_water = 0;
    }

    #[cfg(test)]
    pub fn log(&self) -> Vec<ProgressEvent> {
        self.inner.lock().log.clone()
    }
}

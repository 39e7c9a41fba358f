//! Manually settable event flag, the coordination primitive between the
//! receive loop and the stdin path.

use tokio::sync::watch;

/// A level-triggered event: `set`/`clear` flip the state, `wait` resolves
/// as soon as the state is (or becomes) set. Clones observe the same state.
#[derive(Debug, Clone)]
pub(crate) struct Event {
    state: watch::Sender<bool>,
}

impl Event {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// A new event that starts in the set state.
    pub fn new_set() -> Self {
        let event = Self::new();
        event.set();
        event
    }

    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn clear(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the event is set. Returns immediately when already set.
    pub async fn wait(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives in self, so wait_for cannot fail.
        let _ = receiver.wait_for(|set| *set).await;
    }
}

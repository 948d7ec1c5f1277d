//! Shader reload notifications
//!
//! A [`ShaderReloadSource`] tells subscribers that a shader program changed
//! on disk. Subscriptions are scoped: a [`ReloadSubscription`] unsubscribes
//! when dropped, so no callback outlives the renderer that registered it.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::device::ShaderProgram;

/// Callback invoked with the program that was reloaded
pub type ReloadCallback = Arc<dyn Fn(ShaderProgram) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Observer registry for shader reload events
pub trait ShaderReloadSource: Send + Sync {
    fn subscribe(&self, callback: ReloadCallback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, ReloadCallback)>,
}

/// In-process [`ShaderReloadSource`]; the backend's file watcher calls [`notify`](Self::notify)
#[derive(Default)]
pub struct ShaderReloadHub {
    state: Mutex<HubState>,
}

impl std::fmt::Debug for ShaderReloadHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderReloadHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ShaderReloadHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signal every subscriber that `program` was reloaded
    pub fn notify(&self, program: ShaderProgram) {
        // Callbacks run outside the lock so they may (un)subscribe
        let callbacks: Vec<ReloadCallback> = self
            .state()
            .subscribers
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        debug!(
            "shader program '{}' reloaded, notifying {} subscribers",
            program.name(),
            callbacks.len()
        );
        for callback in callbacks {
            callback(program);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }
}

impl ShaderReloadSource for ShaderReloadHub {
    fn subscribe(&self, callback: ReloadCallback) -> SubscriptionId {
        let mut state = self.state();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.push((id, callback));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state().subscribers.retain(|(sub, _)| *sub != id);
    }
}

/// Scoped subscription, unsubscribed on drop
pub struct ReloadSubscription {
    source: Arc<dyn ShaderReloadSource>,
    id: SubscriptionId,
}

impl ReloadSubscription {
    pub fn new(source: Arc<dyn ShaderReloadSource>, callback: ReloadCallback) -> Self {
        let id = source.subscribe(callback);
        Self { source, id }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl std::fmt::Debug for ReloadSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReloadSubscription").field(&self.id).finish()
    }
}

impl Drop for ReloadSubscription {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
    }
}

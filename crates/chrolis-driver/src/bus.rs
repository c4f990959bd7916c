//! Change Notification Bus.
//!
//! Two single-handler slots driven by the status monitor: one for the shutter and one
//! for the LED state device. Installing a handler replaces the previous one. A push
//! with no handler installed is dropped.
//!
//! Handlers run synchronously on the monitor thread and must return quickly.

use parking_lot::RwLock;
use std::sync::Arc;

/// Handler signature: `(index, value)`.
///
/// On the state slot index 0 carries the aggregate mask and indices `1..=6` carry the
/// per-LED enable flags. On the shutter slot index 0 carries the open flag.
pub type ChangeHandler = Arc<dyn Fn(usize, i64) + Send + Sync>;

/// A slot holding zero or one handler.
#[derive(Default)]
pub struct CallbackSlot {
    handler: RwLock<Option<ChangeHandler>>,
}

impl std::fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl CallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any previous one.
    pub fn install<F>(&self, handler: F)
    where
        F: Fn(usize, i64) + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Remove the current handler. Later pushes are dropped.
    pub fn clear(&self) {
        *self.handler.write() = None;
    }

    pub fn is_installed(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Invoke the current handler, if any.
    ///
    /// The lock is released before the handler runs, so a handler may reinstall or
    /// clear its own slot.
    pub fn notify(&self, index: usize, value: i64) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(index, value);
        }
    }
}

/// The hub's pair of slots.
#[derive(Debug, Default)]
pub struct ChangeBus {
    pub shutter: CallbackSlot,
    pub state: CallbackSlot,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }
}

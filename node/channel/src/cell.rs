//! Local typed state: boolean and float cells, and event channels.
//!
//! A cell is a shared mutable value with change listeners. Listeners run
//! synchronously on the writing thread, against a snapshot of the
//! listener list, so a listener may register further listeners without
//! deadlocking. Cells are cheap to clone; clones share state.

use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;
type Callback = Arc<dyn Fn() + Send + Sync>;

struct CellState<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<Listener<T>>>,
}

/// A shared boolean value with change notification.
#[derive(Clone)]
pub struct BooleanCell {
    state: Arc<CellState<bool>>,
}

impl BooleanCell {
    pub fn new(initial: bool) -> Self {
        BooleanCell {
            state: Arc::new(CellState {
                value: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn get(&self) -> bool {
        *self.state.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Update the value. Listeners fire only when it actually changed.
    pub fn set(&self, value: bool) {
        {
            let mut current = self.state.value.lock().unwrap_or_else(|e| e.into_inner());
            if *current == value {
                return;
            }
            *current = value;
        }
        let snapshot: Vec<Listener<bool>> = self
            .state
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn on_change(&self, f: impl Fn(bool) + Send + Sync + 'static) {
        self.state
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(f));
    }
}

/// A shared f32 value with change notification.
///
/// Change detection compares bit patterns rather than values, so writing
/// NaN over NaN is a no-op and writing `-0.0` over `0.0` is a change.
/// Plain `==` would invert both.
#[derive(Clone)]
pub struct FloatCell {
    state: Arc<CellState<f32>>,
}

impl FloatCell {
    pub fn new(initial: f32) -> Self {
        FloatCell {
            state: Arc::new(CellState {
                value: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn get(&self) -> f32 {
        *self.state.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, value: f32) {
        {
            let mut current = self.state.value.lock().unwrap_or_else(|e| e.into_inner());
            if current.to_bits() == value.to_bits() {
                return;
            }
            *current = value;
        }
        let snapshot: Vec<Listener<f32>> = self
            .state
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn on_change(&self, f: impl Fn(f32) + Send + Sync + 'static) {
        self.state
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(f));
    }
}

/// A valueless event: fire on one side, listen on the other.
#[derive(Clone, Default)]
pub struct EventChannel {
    listeners: Arc<Mutex<Vec<Callback>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let snapshot: Vec<Callback> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in snapshot {
            listener();
        }
    }

    pub fn on_fire(&self, f: impl Fn() + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_boolean_cell_fires_only_on_change() {
        let cell = BooleanCell::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = fired.clone();
        cell.on_change(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(false);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        cell.set(true);
        cell.set(true);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cell.get());
    }

    #[test]
    fn test_float_cell_compares_bit_patterns() {
        let cell = FloatCell::new(0.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = fired.clone();
        cell.on_change(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(f32::NAN);
        cell.set(f32::NAN);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cell.get().is_nan());

        // Negative zero is a distinct bit pattern from positive zero.
        cell.set(0.0);
        cell.set(-0.0);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_channel_reaches_all_listeners() {
        let event = EventChannel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = fired.clone();
            event.on_fire(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        event.fire();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clones_share_state() {
        let cell = FloatCell::new(1.0);
        let other = cell.clone();
        other.set(2.5);
        assert_eq!(cell.get(), 2.5);
    }
}

use tokio::sync::RwLock;

/// Internal ring state guarded by a single `RwLock`.
#[derive(Debug)]
struct WindowState {
    window: Vec<u8>,
    offset: usize,
}

/// Fixed-capacity ring of 0/1 observations used to compute a rolling success
/// rate per target.
///
/// The window grows until it reaches capacity, then every observation
/// overwrites the oldest slot. Writers (`observe`, `reset`) take the write
/// lock, readers (`sum`, `avg`, `has_enough`) the read lock; no await happens
/// while a lock is held.
#[derive(Debug)]
pub struct RollingWindow {
    size: usize,
    inner: RwLock<WindowState>,
}

impl RollingWindow {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            inner: RwLock::new(WindowState { window: Vec::with_capacity(size), offset: 0 }),
        }
    }

    /// Records one observation: `1` for success, `0` for failure.
    ///
    /// Values other than 0/1 are clamped to 1 so `sum` stays a plain count.
    pub async fn observe(&self, value: u8) {
        let value = u8::from(value != 0);
        let mut state = self.inner.write().await;

        if state.window.len() < self.size {
            state.window.push(value);
            return;
        }

        let offset = state.offset;
        state.window[offset] = value;
        state.offset = (offset + 1) % self.size;
    }

    pub async fn sum(&self) -> u32 {
        let state = self.inner.read().await;
        state.window.iter().map(|v| u32::from(*v)).sum()
    }

    /// Mean of the current observations, `0.0` when the window is empty.
    /// Callers gate on [`has_enough`](Self::has_enough) before acting on it.
    pub async fn avg(&self) -> f64 {
        let state = self.inner.read().await;
        if state.window.is_empty() {
            return 0.0;
        }

        let sum: u32 = state.window.iter().map(|v| u32::from(*v)).sum();
        f64::from(sum) / state.window.len() as f64
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.window.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.window.is_empty()
    }

    /// True once the window holds a full capacity of observations.
    pub async fn has_enough(&self) -> bool {
        let state = self.inner.read().await;
        !state.window.is_empty() && state.window.len() == self.size
    }

    /// Empties the window and rewinds the write cursor.
    pub async fn reset(&self) {
        let mut state = self.inner.write().await;
        state.window.clear();
        state.offset = 0;
    }
}

use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Back-off applied to the first taint of an episode.
pub const INITIAL_BACK_OFF: Duration = Duration::from_secs(30);
/// Upper bound for the escalated back-off.
pub const MAX_BACK_OFF: Duration = Duration::from_secs(600);
/// A taint landing within this window of the previous untaint doubles the
/// back-off instead of starting over.
pub const RESET_WINDOW: Duration = Duration::from_secs(300);

/// Mutable taint state, consolidated under one lock so flag, back-off, and
/// epoch always transition together.
#[derive(Debug)]
struct TaintState {
    tainted: bool,
    current_back_off: Duration,
    /// `None` until the first untaint; the first taint of a controller's
    /// life always takes the initial back-off.
    last_cleared_at: Option<Instant>,
    /// Bumped on every taint and untaint. The auto-clear task captures the
    /// epoch at spawn time and only clears if it still matches, so a timer
    /// left over from an earlier episode can never clear a fresh taint.
    epoch: u64,
}

/// Per-target taint flag with exponential back-off auto-clear.
///
/// A tainted target is excluded from candidate selection regardless of
/// liveness. Tainting schedules an automatic untaint after the current
/// back-off; repeat offenders (re-tainted within [`RESET_WINDOW`] of the
/// previous clear) see the back-off double up to [`MAX_BACK_OFF`].
#[derive(Debug)]
pub struct TaintController {
    name: Arc<str>,
    inner: Arc<RwLock<TaintState>>,
}

impl TaintController {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(RwLock::new(TaintState {
                tainted: false,
                current_back_off: INITIAL_BACK_OFF,
                last_cleared_at: None,
                epoch: 0,
            })),
        }
    }

    /// Marks the target tainted and schedules the auto-clear.
    ///
    /// No-op when already tainted: the running episode keeps its timer.
    pub async fn taint(&self) {
        let (back_off, epoch) = {
            let mut state = self.inner.write().await;
            if state.tainted {
                return;
            }

            state.current_back_off = match state.last_cleared_at {
                Some(cleared) if cleared.elapsed() <= RESET_WINDOW => {
                    (state.current_back_off * 2).min(MAX_BACK_OFF)
                }
                _ => INITIAL_BACK_OFF,
            };
            state.tainted = true;
            state.epoch += 1;

            (state.current_back_off, state.epoch)
        };

        tracing::warn!(
            upstream = %self.name,
            back_off_secs = back_off.as_secs(),
            "target tainted, scheduling auto-clear"
        );

        let name = Arc::clone(&self.name);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(back_off).await;

            let mut state = inner.write().await;
            if state.epoch != epoch || !state.tainted {
                // A newer episode or a manual untaint superseded this timer.
                return;
            }
            state.tainted = false;
            state.last_cleared_at = Some(Instant::now());
            tracing::info!(upstream = %name, "taint expired, target re-admitted");
        });
    }

    /// Clears the taint immediately. Safe to call on a clear controller.
    pub async fn untaint(&self) {
        let mut state = self.inner.write().await;
        state.tainted = false;
        state.last_cleared_at = Some(Instant::now());
        state.epoch += 1;
    }

    pub async fn is_tainted(&self) -> bool {
        self.inner.read().await.tainted
    }

    pub async fn current_back_off(&self) -> Duration {
        self.inner.read().await.current_back_off
    }
}

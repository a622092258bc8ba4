use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::trace;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a periodic timer running on the tokio clock.
///
/// Cancelling is idempotent and safe from inside the timer's own callback.
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Runs `tick` every `period` until the returned handle is cancelled.
///
/// The first tick fires one full period after the call. Must be called from
/// within a tokio runtime.
pub(crate) fn spawn_interval<F>(label: &'static str, period: Duration, mut tick: F) -> TimerHandle
where
    F: FnMut() + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => break,
                _ = ticker.tick() => {
                    if cancelled.is_cancelled() {
                        break;
                    }
                    trace!(timer = label, "timer tick");
                    tick();
                }
            }
        }
        trace!(timer = label, "timer stopped");
    });

    TimerHandle { token }
}

/// Suspends the calling operation for a simulated latency.
pub(crate) async fn simulate_latency(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

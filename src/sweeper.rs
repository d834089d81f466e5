//! Periodic background maintenance loops.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Run `task` every `every` until `shutdown` flips to `true` or its sender is dropped.
///
/// The first run happens one full interval after spawning.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let every = every.max(MIN_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => task().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(sweeper = name, "Sweeper stopped");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn runs_on_interval_and_stops_on_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let counter = Arc::clone(&runs);
        let handle = spawn_periodic("test", Duration::from_secs(10), rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        tx.send(true).expect("sweeper alive");
        handle.await.expect("sweeper joined");
    }

    #[tokio::test]
    async fn stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_periodic("test", Duration::from_secs(3600), rx, || async {});
        drop(tx);
        handle.await.expect("sweeper joined");
    }
}

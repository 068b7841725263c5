//! Parallel lifecycle fan-out
//!
//! Runs a synchronous lifecycle call on every member of a collection in parallel on the
//! blocking pool and joins all of them before returning.

use std::sync::Arc;

use log::error;
use tokio::task::JoinSet;

/// Run `op` on every item in parallel; `true` only when every call returned `true`
///
/// Every call is joined even after a failure is seen. A panicking call counts as a failure.
pub(crate) async fn all<T, F>(items: &[Arc<T>], what: &str, op: F) -> bool
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&T) -> bool + Clone + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for item in items {
        let item = Arc::clone(item);
        let op = op.clone();
        tasks.spawn_blocking(move || op(&*item));
    }

    let mut ok = true;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(true) => {}
            Ok(false) => ok = false,
            Err(e) => {
                error!("{} task failed: {}", what, e);
                ok = false;
            }
        }
    }
    ok
}

/// Run `op` on every item in parallel and wait for all of them; never fails
pub(crate) async fn each<T, F>(items: &[Arc<T>], what: &str, op: F)
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&T) + Clone + Send + 'static,
{
    all(items, what, move |item| {
        op(item);
        true
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_succeeds() {
        let items: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let ok = all(&items, "test", |item: &AtomicUsize| {
            item.fetch_add(1, Ordering::SeqCst);
            true
        })
        .await;

        assert!(ok);
        assert!(items.iter().all(|item| item.load(Ordering::SeqCst) == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_failure_fails_but_all_run() {
        let items: Vec<Arc<AtomicUsize>> = (0..4).map(|i| Arc::new(AtomicUsize::new(i))).collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let ok = all(&items, "test", move |item: &AtomicUsize| {
            counted.fetch_add(1, Ordering::SeqCst);
            item.load(Ordering::SeqCst) != 2
        })
        .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panic_counts_as_failure() {
        let items = vec![Arc::new(AtomicUsize::new(0))];
        let ok = all(&items, "test", |_: &AtomicUsize| -> bool { panic!("boom") }).await;
        assert!(!ok);
    }
}

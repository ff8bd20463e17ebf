//! Caches a function's result for a fixed interval, to rate-limit expensive
//! shell-outs such as `git log`.
//!
//! The original cached any function via reflection; that isn't needed here
//! since every caller wants the same shape back, so this is a plain
//! parameterised container over `T` instead.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Cached<T> {
  at: Instant,
  value: T,
}

/// A single debounce gate. Holds the last computed value and the time it
/// was computed; concurrent callers serialize on the internal lock so two
/// near-simultaneous calls within the interval both observe the same
/// cached result instead of racing to recompute it.
pub struct Debounce<T: Clone> {
  interval: Duration,
  cached: Mutex<Option<Cached<T>>>,
}

impl<T: Clone> Debounce<T> {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      cached: Mutex::new(None),
    }
  }

  /// If the last call to `run` completed less than `interval` ago, returns
  /// the cached result without invoking `fn_`. Otherwise invokes `fn_`,
  /// caches its result, and returns it.
  pub async fn run<F, Fut>(&self, fn_: F) -> T
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    let mut guard = self.cached.lock().await;
    if let Some(cached) = guard.as_ref() {
      if cached.at.elapsed() < self.interval {
        return cached.value.clone();
      }
    }
    let value = fn_().await;
    *guard = Some(Cached {
      at: Instant::now(),
      value: value.clone(),
    });
    value
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  #[tokio::test]
  async fn caches_within_interval_and_refreshes_after() {
    let calls = AtomicU32::new(0);
    let debounce = Debounce::new(Duration::from_millis(50));

    let first = debounce
      .run(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        "a"
      })
      .await;
    let second = debounce
      .run(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        "b"
      })
      .await;
    assert_eq!(first, "a");
    assert_eq!(second, "a");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let third = debounce
      .run(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        "c"
      })
      .await;
    assert_eq!(third, "c");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}

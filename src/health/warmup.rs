//! Pre-promotion warmup.
//!
//! # Responsibilities
//! - Bound the number of warmups running across the process
//! - Run a fixed number of probe attempts, each under its own timeout
//!
//! A timed-out attempt is not counted even if it completes later; it is
//! left to finish in the background.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::WarmupConfig;

/// Process-wide warmup gate. One instance is shared by every account.
#[derive(Debug)]
pub struct WarmupProber {
    config: WarmupConfig,
    slots: Arc<Semaphore>,
}

impl WarmupProber {
    pub fn new(config: WarmupConfig) -> Self {
        let config = config.normalized();
        let slots = Arc::new(Semaphore::new(config.concurrency));
        Self { config, slots }
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `attempts` probes for `node_name` and return how many passed.
    ///
    /// The slot is held for the whole sequence; callers wait for a free
    /// one without timing out.
    pub async fn run<F, Fut>(&self, node_name: &str, attempt: F) -> u32
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let _permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(node = %node_name, "Warmup gate closed");
                return 0;
            }
        };

        let timeout = self.config.timeout();
        let mut successes = 0;
        for n in 1..=self.config.attempts {
            let handle = tokio::spawn(attempt());
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(true)) => successes += 1,
                Ok(Ok(false)) => {
                    tracing::debug!(node = %node_name, attempt = n, "Warmup attempt failed");
                }
                Ok(Err(e)) => {
                    tracing::error!(node = %node_name, attempt = n, error = %e, "Warmup attempt aborted");
                }
                Err(_) => {
                    tracing::warn!(
                        node = %node_name,
                        attempt = n,
                        timeout_ms = self.config.timeout_ms,
                        "Warmup attempt timed out"
                    );
                }
            }
        }

        tracing::debug!(
            node = %node_name,
            successes,
            attempts = self.config.attempts,
            "Warmup finished"
        );
        successes
    }
}

/// Pass/fail predicate for a warmup result.
pub fn is_node_warmed_up(success_count: u32, config: &WarmupConfig) -> bool {
    success_count >= config.required_success
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(attempts: u32, timeout_ms: u64, concurrency: usize) -> WarmupConfig {
        WarmupConfig {
            enabled: true,
            attempts,
            timeout_ms,
            required_success: 1,
            concurrency,
        }
    }

    #[test]
    fn test_is_node_warmed_up() {
        let cfg = WarmupConfig {
            attempts: 3,
            required_success: 2,
            ..WarmupConfig::default()
        };
        assert!(!is_node_warmed_up(0, &cfg));
        assert!(!is_node_warmed_up(1, &cfg));
        assert!(is_node_warmed_up(2, &cfg));
        assert!(is_node_warmed_up(3, &cfg));
    }

    #[tokio::test]
    async fn test_counts_successful_attempts() {
        let prober = WarmupProber::new(config(3, 1_000, 1));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let successes = prober
            .run("n1", move || {
                let c = c.clone();
                // Alternate pass / fail.
                async move { c.fetch_add(1, Ordering::SeqCst) % 2 == 0 }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(successes, 2);
    }

    #[tokio::test]
    async fn test_timed_out_attempt_does_not_count() {
        let prober = WarmupProber::new(config(2, 50, 1));
        let successes = prober
            .run("slow", || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                true
            })
            .await;
        assert_eq!(successes, 0);
    }

    #[tokio::test]
    async fn test_panicking_attempt_does_not_count() {
        let prober = WarmupProber::new(config(2, 1_000, 1));
        let successes = prober
            .run("broken", || async {
                if true {
                    panic!("probe exploded");
                }
                true
            })
            .await;
        assert_eq!(successes, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let prober = Arc::new(WarmupProber::new(config(1, 1_000, 8)));
        assert_eq!(prober.available_slots(), 2);

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..6 {
            let prober = prober.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                prober
                    .run(&format!("n{i}"), move || {
                        let running = running.clone();
                        let peak = peak.clone();
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            true
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 1);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(prober.available_slots(), 2);
    }
}

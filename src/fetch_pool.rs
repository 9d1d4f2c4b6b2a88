//! Bounded fetch worker pool.
//!
//! A fixed number of workers drain a pre-filled queue of URLs. Each fetch
//! is bounded by its own timeout, so a hanging source costs at most one
//! timeout per worker and never the whole phase. Successful documents go
//! into a shared result list; timeouts and errors are dropped. The pool
//! returns once every worker has exited, with results in input order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use answer_engine_core::models::Document;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, StreamEvent};
use crate::traits::FetchBackend;

/// Pool parameters.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub workers: usize,
    pub fetch_timeout: Duration,
}

/// Fetch `urls` with at most `opts.workers` fetches in flight.
///
/// Emits a `progress` event (phase `fetch`) after each URL settles.
/// Cancellation stops workers from taking new URLs; in-flight fetches are
/// abandoned.
pub async fn fetch_all(
    fetcher: Arc<dyn FetchBackend>,
    urls: Vec<String>,
    opts: PoolOptions,
    cancel: CancellationToken,
    sink: EventSink,
) -> Vec<Document> {
    let total = urls.len();
    if total == 0 {
        return Vec::new();
    }

    let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
        Arc::new(Mutex::new(urls.into_iter().enumerate().collect()));
    let results: Arc<Mutex<Vec<(usize, Document)>>> = Arc::new(Mutex::new(Vec::new()));
    let settled = Arc::new(AtomicUsize::new(0));

    let mut workers = JoinSet::new();
    for worker in 0..opts.workers.clamp(1, total) {
        let fetcher = fetcher.clone();
        let queue = queue.clone();
        let results = results.clone();
        let settled = settled.clone();
        let cancel = cancel.clone();
        let sink = sink.clone();

        workers.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut q) => q.pop_front(),
                    Err(_) => None,
                };
                let Some((index, url)) = next else {
                    break;
                };

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    out = tokio::time::timeout(opts.fetch_timeout, fetcher.fetch(&url)) => out,
                };
                match outcome {
                    Ok(Ok(doc)) => {
                        if let Ok(mut r) = results.lock() {
                            r.push((index, doc));
                        }
                    }
                    Ok(Err(e)) => tracing::debug!(worker, url = %url, error = %e, "fetch failed"),
                    Err(_) => tracing::debug!(worker, url = %url, "fetch timed out"),
                }

                let done = settled.fetch_add(1, Ordering::AcqRel) + 1;
                sink.emit(StreamEvent::progress_count(
                    "fetch",
                    format!("Fetched {} of {} sources", done, total),
                    done,
                    total,
                ))
                .await;
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "fetch worker panicked");
        }
    }

    let mut collected = match Arc::try_unwrap(results) {
        Ok(m) => m.into_inner().unwrap_or_default(),
        Err(shared) => shared.lock().map(|r| r.clone()).unwrap_or_default(),
    };
    collected.sort_by_key(|(i, _)| *i);
    collected.into_iter().map(|(_, d)| d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_engine_core::models::Chunk;
    use async_trait::async_trait;

    /// Hangs forever on URLs containing "hang"; tracks peak concurrency.
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FetchBackend for SlowFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<Document> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.peak.fetch_max(now, Ordering::SeqCst);
            if url.contains("hang") {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Document {
                url: url.to_string(),
                title: url.to_string(),
                chunks: vec![Chunk {
                    url: url.to_string(),
                    text: "body".into(),
                }],
                fetched_at: chrono::Utc::now(),
            })
        }
    }

    fn fetcher() -> Arc<SlowFetcher> {
        Arc::new(SlowFetcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_sources_time_out_and_rest_complete() {
        let f = fetcher();
        let urls: Vec<String> = (0..12)
            .map(|i| {
                if i % 4 == 1 {
                    format!("https://hang.example/{}", i)
                } else {
                    format!("https://ok.example/{}", i)
                }
            })
            .collect();
        let docs = fetch_all(
            f.clone(),
            urls,
            PoolOptions {
                workers: 5,
                fetch_timeout: Duration::from_secs(15),
            },
            CancellationToken::new(),
            EventSink::disabled(),
        )
        .await;

        assert_eq!(docs.len(), 9);
        assert!(docs.iter().all(|d| d.url.contains("ok.example")));
        let order: Vec<&str> = docs.iter().map(|d| d.url.as_str()).collect();
        let mut sorted = order.clone();
        sorted.sort_by_key(|u| u.rsplit('/').next().and_then(|n| n.parse::<u32>().ok()));
        assert_eq!(order, sorted);
        assert!(f.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let docs = fetch_all(
            fetcher(),
            Vec::new(),
            PoolOptions {
                workers: 5,
                fetch_timeout: Duration::from_secs(1),
            },
            CancellationToken::new(),
            EventSink::disabled(),
        )
        .await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_pool_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let docs = fetch_all(
            fetcher(),
            vec!["https://ok.example/1".into()],
            PoolOptions {
                workers: 2,
                fetch_timeout: Duration::from_secs(1),
            },
            cancel,
            EventSink::disabled(),
        )
        .await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_progress_events_per_url() {
        let (sink, mut rx) = EventSink::channel(64);
        let urls: Vec<String> = (0..3).map(|i| format!("https://ok.example/{}", i)).collect();
        let docs = fetch_all(
            fetcher(),
            urls,
            PoolOptions {
                workers: 2,
                fetch_timeout: Duration::from_secs(5),
            },
            CancellationToken::new(),
            sink,
        )
        .await;
        assert_eq!(docs.len(), 3);
        let mut last = 0;
        while let Ok(ev) = rx.try_recv() {
            if let StreamEvent::Progress { completed, total, .. } = ev {
                assert_eq!(total, Some(3));
                last = last.max(completed.unwrap_or(0));
            }
        }
        assert_eq!(last, 3);
    }
}

//! Inference dispatch: one backend request per page, bounded concurrency.
//!
//! ## Scheduling
//!
//! Jobs are fanned out with `buffer_unordered(concurrency)`: at most
//! `concurrency` pages hold a backend request open at any time. Every job
//! carries its slot index; [`dispatch_all`] writes each result into a
//! pre-allocated slot so the output order always equals the input order,
//! whatever order the pages finish in.
//!
//! ## Retries
//!
//! Each page owns its retry counter. A call that times out (per-call
//! deadline `api_timeout_secs`) or fails transiently is retried after
//! `retry_backoff_ms * 2^(attempt-1)`; with 500 ms and two retries the wait
//! sequence is 500 ms → 1 s. A rejected request is not retried. Once the
//! budget is spent the page is `Filtered` with the diagnostic kept as raw
//! text; nothing escapes past the page.

use crate::config::ParseConfig;
use crate::document::Page;
use crate::error::{BackendError, FilterReason};
use crate::output::{Dimensions, PageOutcome, PageResult, PageStatus};
use crate::pipeline::backend::InferenceBackend;
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::layout::{self, RegionRequest};
use crate::pipeline::parse;
use crate::prompts::PromptMode;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A boxed stream of page results in completion order.
pub type PageResultStream = Pin<Box<dyn Stream<Item = PageResult> + Send>>;

/// One unit of dispatch work, owning everything the request needs.
#[derive(Debug, Clone)]
pub struct PageJob {
    pub page_index: usize,
    pub original: Dimensions,
    pub scaled: Dimensions,
    pub prompt: String,
    pub mode: PromptMode,
    payload: Result<EncodedImage, (FilterReason, String)>,
}

impl PageJob {
    /// Whole-page request.
    pub fn for_page(page: &Page, prompt: &str, mode: PromptMode) -> Self {
        let payload = match page.plan() {
            None => Err((
                FilterReason::InvalidDimensions,
                format!(
                    "invalid image dimensions {}x{}",
                    page.original().width,
                    page.original().height
                ),
            )),
            Some(_) => encode::encode_page(page.image())
                .map_err(|e| (FilterReason::EncodeFailed, e.to_string())),
        };
        Self {
            page_index: page.index(),
            original: page.original(),
            scaled: page.scaled(),
            prompt: prompt.to_string(),
            mode,
            payload,
        }
    }

    /// Region request prepared by [`layout::prepare_region`].
    pub fn for_region(page: &Page, request: &RegionRequest<'_>) -> Self {
        Self {
            page_index: page.index(),
            original: page.original(),
            scaled: page.scaled(),
            prompt: request.prompt.clone(),
            mode: PromptMode::GroundingOcr,
            payload: encode::encode_page(&request.image)
                .map_err(|e| (FilterReason::EncodeFailed, e.to_string())),
        }
    }
}

/// Per-page retry and deadline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ParseConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }
}

/// Final result of a call and the retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted {
    pub result: Result<String, BackendError>,
    pub retries: u32,
}

/// Call the backend, retrying transient failures under `policy`.
pub async fn call_with_retry(
    backend: &dyn InferenceBackend,
    image: &EncodedImage,
    prompt: &str,
    policy: &RetryPolicy,
    page_num: usize,
) -> Attempted {
    let mut last_err: Option<BackendError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "Page {}: retry {}/{} after {:?}",
                page_num, attempt, policy.max_retries, backoff
            );
            sleep(backoff).await;
        }

        let err = match timeout(policy.timeout, backend.infer(image, prompt)).await {
            Ok(Ok(text)) => {
                return Attempted {
                    result: Ok(text),
                    retries: attempt,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => BackendError::Timeout {
                secs: policy.timeout.as_secs(),
            },
        };

        warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err);
        if !err.is_transient() {
            return Attempted {
                result: Err(err),
                retries: attempt,
            };
        }
        last_err = Some(err);
    }

    Attempted {
        result: Err(last_err
            .unwrap_or_else(|| BackendError::Unavailable("no attempt was made".into()))),
        retries: policy.max_retries,
    }
}

/// Send one job and turn the response into a page result.
async fn run_job(job: PageJob, backend: &dyn InferenceBackend, config: &ParseConfig) -> PageResult {
    let start = Instant::now();
    let page_num = job.page_index + 1;

    let (outcome, retries) = match &job.payload {
        Err((reason, detail)) => (
            PageOutcome::Filtered {
                raw_text: detail.clone(),
                reason: *reason,
            },
            0,
        ),
        Ok(image) => {
            let policy = RetryPolicy::from_config(config);
            let attempted = call_with_retry(backend, image, &job.prompt, &policy, page_num).await;
            match attempted.result {
                Ok(raw) => {
                    debug!("Page {}: {} bytes of response", page_num, raw.len());
                    let parsed = parse::parse_response(&raw, job.mode);
                    (
                        layout::refine(parsed, job.scaled, config.dedup_iou_threshold),
                        attempted.retries,
                    )
                }
                Err(e) => (
                    PageOutcome::Filtered {
                        raw_text: format!("{} (after {} attempt(s))", e, attempted.retries + 1),
                        reason: e.filter_reason(),
                    },
                    attempted.retries,
                ),
            }
        }
    };

    PageResult {
        page_index: job.page_index,
        original: job.original,
        scaled: job.scaled,
        outcome,
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Fan jobs out and yield `(slot, result)` in completion order.
fn run_jobs(
    jobs: Vec<PageJob>,
    backend: Arc<dyn InferenceBackend>,
    config: &ParseConfig,
) -> impl Stream<Item = (usize, PageResult)> + Send + 'static {
    let total = jobs.len();
    let config = Arc::new(config.clone());
    let finished = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));
    info!(
        "Dispatching {} page(s) to '{}' (concurrency {})",
        total,
        backend.name(),
        config.concurrency
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_parse_start(total);
        if total == 0 {
            cb.on_parse_complete(0, 0);
        }
    }

    let concurrency = config.concurrency.max(1);
    stream::iter(jobs.into_iter().enumerate().map(move |(slot, job)| {
        let backend = Arc::clone(&backend);
        let config = Arc::clone(&config);
        let finished = Arc::clone(&finished);
        let succeeded = Arc::clone(&succeeded);
        async move {
            let page_num = job.page_index + 1;
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page_num, total);
            }

            let result = run_job(job, backend.as_ref(), &config).await;

            if result.status() == PageStatus::Succeeded {
                succeeded.fetch_add(1, Ordering::SeqCst);
            } else if let PageOutcome::Filtered { reason, .. } = &result.outcome {
                warn!("Page {}: filtered ({})", page_num, reason);
            }
            if let Some(ref cb) = config.progress_callback {
                match result.outcome.filter_reason() {
                    None => cb.on_page_complete(page_num, total, result.elements().len()),
                    Some(reason) => cb.on_page_filtered(page_num, total, &reason.to_string()),
                }
            }
            if finished.fetch_add(1, Ordering::SeqCst) + 1 == total {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_parse_complete(total, succeeded.load(Ordering::SeqCst));
                }
            }
            (slot, result)
        }
    }))
    .buffer_unordered(concurrency)
}

/// Dispatch every job; results come back in job order.
pub async fn dispatch_all(
    jobs: Vec<PageJob>,
    backend: Arc<dyn InferenceBackend>,
    config: &ParseConfig,
) -> Vec<PageResult> {
    let mut slots: Vec<Option<PageResult>> = vec![None; jobs.len()];
    let mut results = run_jobs(jobs, backend, config);
    while let Some((slot, result)) = results.next().await {
        slots[slot] = Some(result);
    }
    slots.into_iter().flatten().collect()
}

/// Dispatch every job; results are yielded as pages complete.
pub fn dispatch_stream(
    jobs: Vec<PageJob>,
    backend: Arc<dyn InferenceBackend>,
    config: &ParseConfig,
) -> PageResultStream {
    Box::pin(run_jobs(jobs, backend, config).map(|(_, result)| result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PixelBudget;
    use crate::document::Document;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::Mutex;

    /// Answers by image width; widths listed in `fail` always time out.
    struct ByWidth {
        fail: Vec<u32>,
        delay_ms: fn(u32) -> u64,
        calls: Mutex<Vec<u32>>,
    }

    impl ByWidth {
        fn new(fail: Vec<u32>) -> Self {
            Self {
                fail,
                delay_ms: |_| 0,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_for(&self, width: u32) -> usize {
            self.calls.lock().unwrap().iter().filter(|w| **w == width).count()
        }
    }

    #[async_trait]
    impl InferenceBackend for ByWidth {
        fn name(&self) -> &str {
            "by-width"
        }

        async fn infer(&self, image: &EncodedImage, _prompt: &str) -> Result<String, BackendError> {
            self.calls.lock().unwrap().push(image.width);
            sleep(Duration::from_millis((self.delay_ms)(image.width))).await;
            if self.fail.contains(&image.width) {
                return Err(BackendError::Timeout { secs: 1 });
            }
            Ok(format!(
                r#"[{{"category":"Text","bbox":[1,1,5,5],"text":"w{}"}}]"#,
                image.width
            ))
        }
    }

    fn doc(widths: &[u32]) -> Document {
        Document::from_images(
            "test",
            widths.iter().map(|w| DynamicImage::new_rgb8(*w, 10)),
            PixelBudget::default(),
        )
    }

    fn jobs(doc: &Document) -> Vec<PageJob> {
        doc.pages()
            .iter()
            .map(|p| PageJob::for_page(p, "prompt", PromptMode::LayoutAll))
            .collect()
    }

    fn config(concurrency: usize) -> ParseConfig {
        ParseConfig::builder()
            .concurrency(concurrency)
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let backend = Arc::new(ByWidth {
            // Earlier pages answer last.
            delay_ms: |w| 60u64.saturating_sub(w as u64),
            ..ByWidth::new(vec![])
        });
        let d = doc(&[10, 20, 30, 40, 50]);
        let results = dispatch_all(jobs(&d), backend, &config(5)).await;
        let order: Vec<_> = results.iter().map(|r| r.page_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(results[2].elements()[0].text, "w30");
    }

    #[tokio::test]
    async fn failing_page_is_isolated() {
        let backend = Arc::new(ByWidth::new(vec![20]));
        let d = doc(&[10, 20, 30]);
        let results = dispatch_all(jobs(&d), backend.clone(), &config(2)).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status(), PageStatus::Succeeded);
        assert_eq!(results[2].status(), PageStatus::Succeeded);
        let failed = &results[1];
        assert_eq!(failed.outcome.filter_reason(), Some(FilterReason::BackendTimeout));
        assert_eq!(failed.retries, 2);
        match &failed.outcome {
            PageOutcome::Filtered { raw_text, .. } => assert!(raw_text.contains("timed out")),
            other => panic!("expected Filtered, got {other:?}"),
        }
        // Each page has its own retry budget.
        assert_eq!(backend.calls_for(20), 3);
        assert_eq!(backend.calls_for(10), 1);
    }

    #[tokio::test]
    async fn rejected_request_is_not_retried() {
        struct Reject;

        #[async_trait]
        impl InferenceBackend for Reject {
            fn name(&self) -> &str {
                "reject"
            }

            async fn infer(&self, _: &EncodedImage, _: &str) -> Result<String, BackendError> {
                Err(BackendError::Rejected {
                    status: 401,
                    detail: "bad key".into(),
                })
            }
        }

        let d = doc(&[10]);
        let results = dispatch_all(jobs(&d), Arc::new(Reject), &config(1)).await;
        assert_eq!(results[0].retries, 0);
        assert_eq!(
            results[0].outcome.filter_reason(),
            Some(FilterReason::BackendRejected)
        );
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        struct Flaky(AtomicUsize);

        #[async_trait]
        impl InferenceBackend for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }

            async fn infer(&self, _: &EncodedImage, _: &str) -> Result<String, BackendError> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BackendError::Unavailable("503".into()))
                } else {
                    Ok("[]".into())
                }
            }
        }

        let d = doc(&[10]);
        let results = dispatch_all(jobs(&d), Arc::new(Flaky(AtomicUsize::new(0))), &config(1)).await;
        assert_eq!(results[0].status(), PageStatus::Succeeded);
        assert_eq!(results[0].retries, 1);
    }

    #[tokio::test]
    async fn deadline_applies_per_call() {
        struct Slow;

        #[async_trait]
        impl InferenceBackend for Slow {
            fn name(&self) -> &str {
                "slow"
            }

            async fn infer(&self, _: &EncodedImage, _: &str) -> Result<String, BackendError> {
                sleep(Duration::from_secs(30)).await;
                Ok("[]".into())
            }
        }

        let cfg = ParseConfig::builder()
            .api_timeout_secs(1)
            .max_retries(0)
            .build()
            .unwrap();
        let d = doc(&[10]);
        let results = dispatch_all(jobs(&d), Arc::new(Slow), &cfg).await;
        assert_eq!(
            results[0].outcome.filter_reason(),
            Some(FilterReason::BackendTimeout)
        );
    }

    #[tokio::test]
    async fn zero_sized_page_skips_backend() {
        let backend = Arc::new(ByWidth::new(vec![]));
        let d = doc(&[0, 10]);
        let results = dispatch_all(jobs(&d), backend.clone(), &config(2)).await;
        assert_eq!(
            results[0].outcome.filter_reason(),
            Some(FilterReason::InvalidDimensions)
        );
        assert_eq!(results[1].status(), PageStatus::Succeeded);
        assert_eq!(backend.calls_for(0), 0);
    }

    #[tokio::test]
    async fn stream_yields_every_page() {
        let backend = Arc::new(ByWidth::new(vec![]));
        let d = doc(&[10, 20, 30]);
        let mut indices: Vec<usize> = dispatch_stream(jobs(&d), backend, &config(3))
            .map(|r| r.page_index)
            .collect()
            .await;
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use moka::future::Cache;
use tracing::{debug, info, warn};

use super::retry::{RetryPolicy, translate_with_retry};
use super::Translator;
use crate::cache::{CacheKey, TranslationCache};
use crate::config::{AppConfig, Lang};
use crate::fragment::FragmentId;

/// One distinct source text to translate, with every fragment that uses it
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub key: CacheKey,
    pub text: String,
    pub fragment_ids: Vec<FragmentId>,
}

/// A job whose translation could not be obtained
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub key: CacheKey,
    pub fragment_ids: Vec<FragmentId>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Jobs answered by the translator
    pub translated: usize,
    /// Jobs that found a translation stored by a concurrent run
    pub already_cached: usize,
    pub failed: Vec<FailedJob>,
}

enum Outcome {
    Translated,
    Cached,
    Failed(FailedJob),
}

/// Sends cache misses to the translator through a bounded pool of workers.
///
/// Concurrent requests for the same key share one translation: the first
/// caller runs it and later callers await its result. Every success is
/// stored in the cache immediately, and the cache is flushed after each
/// `checkpoint_every` completions.
pub struct TranslationDispatcher {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    source: Lang,
    target: Lang,
    policy: RetryPolicy,
    workers: usize,
    checkpoint_every: usize,
    in_flight: Cache<CacheKey, Arc<String>>,
}

impl TranslationDispatcher {
    pub fn new(translator: Arc<dyn Translator>, cache: Arc<TranslationCache>, config: &AppConfig) -> Self {
        Self {
            translator,
            cache,
            source: config.source_lang.clone(),
            target: config.target_lang.clone(),
            policy: RetryPolicy::from_config(&config.translator),
            workers: config.translator.max_workers.max(1),
            checkpoint_every: config.cache.checkpoint_every.max(1),
            in_flight: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(600))
                .build(),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Translate every job, reporting `(completed, total)` after each one.
    pub async fn dispatch(
        &self,
        jobs: Vec<TranslationJob>,
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> DispatchSummary {
        let total = jobs.len();
        let mut summary = DispatchSummary::default();
        if total == 0 {
            return summary;
        }

        info!(
            "Translating {} distinct texts with {} ({} workers)",
            total,
            self.translator.name(),
            self.workers
        );

        let mut outcomes = stream::iter(jobs)
            .map(|job| self.run_job(job))
            .buffer_unordered(self.workers);

        let mut completed = 0;
        while let Some(outcome) = outcomes.next().await {
            completed += 1;
            match outcome {
                Outcome::Translated => summary.translated += 1,
                Outcome::Cached => summary.already_cached += 1,
                Outcome::Failed(failed) => summary.failed.push(failed),
            }

            if completed % self.checkpoint_every == 0 {
                self.checkpoint();
            }
            if let Some(progress) = progress {
                progress(completed, total);
            }
        }

        self.checkpoint();
        summary
    }

    async fn run_job(&self, job: TranslationJob) -> Outcome {
        if let Some(_existing) = self.cache.lookup(&job.key) {
            return Outcome::Cached;
        }

        let translator = Arc::clone(&self.translator);
        let (source, target, policy) = (&self.source, &self.target, self.policy);
        let text = job.text.as_str();

        let result = self
            .in_flight
            .try_get_with(job.key.clone(), async move {
                translate_with_retry(translator.as_ref(), text, source, target, &policy)
                    .await
                    .map(Arc::new)
            })
            .await;

        match result {
            Ok(translated) => {
                debug!("Translated {} ({} fragments)", job.key, job.fragment_ids.len());
                self.cache.put(job.key, &job.text, &translated);
                Outcome::Translated
            }
            Err(e) => {
                warn!(
                    "Leaving {} fragment(s) untranslated: {}",
                    job.fragment_ids.len(),
                    e
                );
                Outcome::Failed(FailedJob {
                    key: job.key,
                    fragment_ids: job.fragment_ids,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn checkpoint(&self) {
        if let Err(e) = self.cache.bulk_flush() {
            warn!("Cache checkpoint failed: {e}");
        }
    }
}

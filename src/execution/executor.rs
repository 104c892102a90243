//! Step executor - runs one page of an ETL step with retries

use crate::core::{
    config::SiloConfig, Cursor, JobContext, LoadResult, LoadStrategy, PullError, PullResult,
    PullStrategy, SourceFetchError, Step, StepBody, StepError, TransformError, TransformStrategy,
};
use crate::execution::retry::RetryPolicy;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// What one page did
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub pulled: usize,
    pub has_more: bool,
    pub next_cursor: Option<Cursor>,
    pub load: LoadResult,
    /// Items dropped by the transform
    pub transform_failures: usize,
}

/// Executes pages of ETL steps
#[derive(Debug, Clone)]
pub struct StepExecutor {
    retry: RetryPolicy,
    page_timeout: Duration,
    rate_limit_retries: u32,
    rate_limit_max_wait: Duration,
}

impl StepExecutor {
    pub fn new(config: &SiloConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            page_timeout: config.page_timeout(),
            rate_limit_retries: config.rate_limit.max_retries,
            rate_limit_max_wait: config.rate_limit_max_wait(),
        }
    }

    /// Pull, transform and load the page at `cursor`
    pub async fn run_page(
        &self,
        step: &Step,
        ctx: &mut JobContext,
        cursor: &Cursor,
    ) -> Result<PageOutcome, StepError> {
        let StepBody::Etl {
            pull,
            transform,
            load,
        } = &step.body
        else {
            return Err(StepError::NotPaginated(step.name().to_string()));
        };

        let name = step.name();
        let page_size = ctx.page_size(name, step.descriptor.page_size);

        let page = self.pull_with_retry(name, pull.as_ref(), ctx, cursor, page_size).await?;
        if !page.is_well_formed() {
            error!("Step {} pulled a page claiming more data without a cursor", name);
            return Err(StepError::MalformedPagination);
        }
        debug!("Step {} pulled {} item(s) at {}", name, page.items.len(), cursor);

        let (entities, transform_failures) = self.transform_page(name, transform.as_ref(), ctx, &page.items)?;
        let load = self.load_with_retry(name, load.as_ref(), ctx, entities).await?;

        info!(
            "Step {} page at {}: pulled {}, created {}, existing {}, skipped {}",
            name,
            cursor,
            page.items.len(),
            load.created,
            load.existing,
            load.skipped + transform_failures
        );

        Ok(PageOutcome {
            pulled: page.items.len(),
            has_more: page.has_more,
            next_cursor: page.next_cursor,
            load,
            transform_failures,
        })
    }

    async fn pull_with_retry(
        &self,
        name: &str,
        pull: &dyn PullStrategy,
        ctx: &JobContext,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<PullResult<Value>, StepError> {
        let mut attempts = 0u32;
        let mut fetch_retries = 0u32;
        let mut rate_limit_retries = 0u32;

        loop {
            attempts += 1;
            let result = match timeout(self.page_timeout, pull.pull(ctx, cursor, page_size)).await {
                Ok(result) => result,
                Err(_) => Err(PullError::Fetch(SourceFetchError::timeout(self.page_timeout))),
            };

            match result {
                Ok(page) => return Ok(page),
                Err(PullError::RateLimited(limit)) => {
                    if rate_limit_retries >= self.rate_limit_retries {
                        error!("Step {} still rate limited after {} attempt(s)", name, attempts);
                        return Err(StepError::RateLimitExhausted { attempts });
                    }
                    rate_limit_retries += 1;
                    let wait = limit.wait.min(self.rate_limit_max_wait);
                    warn!(
                        "Step {} rate limited, waiting {}ms ({}/{})",
                        name,
                        wait.as_millis(),
                        rate_limit_retries,
                        self.rate_limit_retries
                    );
                    sleep(wait).await;
                }
                Err(PullError::Fetch(e)) if e.is_transient() && self.retry.allows(fetch_retries) => {
                    fetch_retries += 1;
                    let delay = self.retry.delay_for_attempt(fetch_retries);
                    warn!(
                        "Step {} fetch failed ({}), retry {}/{} in {}ms",
                        name,
                        ctx.credential.redact(&e.to_string()),
                        fetch_retries,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(PullError::Fetch(e)) => {
                    error!("Step {} fetch failed after {} attempt(s)", name, attempts);
                    return Err(StepError::Fetch { attempts, source: e });
                }
            }
        }
    }

    /// Transform every item, skipping the ones that fail
    ///
    /// A page of two or more items where every item is broken points at a
    /// systemic problem (schema change, wrong endpoint) and is fatal.
    fn transform_page(
        &self,
        name: &str,
        transform: &dyn TransformStrategy,
        ctx: &mut JobContext,
        items: &[Value],
    ) -> Result<(Vec<crate::core::TargetEntity>, usize), StepError> {
        let mut entities = Vec::with_capacity(items.len());
        let mut failures: Vec<(String, TransformError)> = Vec::new();

        for item in items {
            match transform.transform(ctx, item) {
                Ok(entity) => entities.push(entity),
                Err(e) => failures.push((item_label(item), e)),
            }
        }

        let broken = failures
            .iter()
            .filter(|(_, e)| !matches!(e, TransformError::Unsupported { .. }))
            .count();
        if items.len() >= 2 && broken == items.len() {
            let first = failures.swap_remove(0).1;
            error!("Step {}: all {} items on the page failed to transform", name, broken);
            return Err(StepError::SystemicTransform {
                failures: broken,
                first,
            });
        }

        let failed = failures.len();
        for (label, e) in failures {
            ctx.warn(name, format!("skipped item {}: {}", label, e));
        }
        Ok((entities, failed))
    }

    async fn load_with_retry(
        &self,
        name: &str,
        load: &dyn LoadStrategy,
        ctx: &mut JobContext,
        entities: Vec<crate::core::TargetEntity>,
    ) -> Result<LoadResult, StepError> {
        if entities.is_empty() {
            return Ok(LoadResult::default());
        }

        let mut retries = 0u32;
        loop {
            match load.load(ctx, name, entities.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && self.retry.allows(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(
                        "Step {} load failed ({}), retry {}/{} in {}ms",
                        name,
                        e,
                        retries,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    error!("Step {} load failed: {}", name, e);
                    return Err(StepError::Load {
                        attempts: retries + 1,
                        source: e,
                    });
                }
            }
        }
    }
}

fn item_label(item: &Value) -> String {
    ["key", "id", "name", "emailAddress"]
        .iter()
        .find_map(|field| match item.get(field) {
            Some(Value::String(s)) => Some(format!("'{}'", s)),
            Some(Value::Number(n)) => Some(format!("'{}'", n)),
            _ => None,
        })
        .unwrap_or_else(|| "<unidentified>".to_string())
}

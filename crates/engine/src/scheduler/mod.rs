//! Scheduler (C9, §4.9) and per-page pipeline (C10, §4.10): ticks on a
//! fixed cadence, opens one ImportRun per active OEM, feeds due pages
//! through the bounded [`crate::queue::WorkQueue`], and drives each page
//! through fetch → diff → render → diff → extract → upsert.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use oemwatch_common::api::render::WaitPolicy;
use oemwatch_common::config::{ApiProbeConfig, OemConfig, SchedulerConfig, TimeoutConfig};
use oemwatch_common::ids::OemId;
use oemwatch_common::types::{ApiDataType, CheckOutcome, ImportRun, ImportRunStatus, PageType, SourcePage};
use oemwatch_common::OemWatchError;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::clients::{FetchClient, RenderClient};
use crate::extract::{ApiFieldMapping, ExtractionCoordinator, ExtractionInputs};
use crate::hashdiff::{raw_hash, rendered_hash};
use crate::llm::LlmRouter;
use crate::probe;
use crate::queue::{CrawlJob, WorkQueue};
use crate::store::{AiLogWriter, CatalogueStore, DiscoveredApiStore, ImportRunStore, OfferCandidate, PageRegistry, UpsertOutcome};

/// One OEM's run-in-progress bookkeeping; removed once the queue drains and
/// no worker holds an in-flight job for it (§4.9 step 5).
struct ActiveRun {
    run: ImportRun,
    in_flight: u32,
}

/// Per-host block counter and cool-down pause state (§4.9/§4.10: a host
/// crossing `host_block_threshold` Blocked outcomes pauses that OEM for
/// `host_cooldown_secs`).
#[derive(Default)]
struct HostState {
    block_counts: HashMap<String, u32>,
    paused_until: HashMap<String, Instant>,
}

/// Everything one pipeline invocation needs; threaded through as a
/// borrowed bundle rather than pulled off `Scheduler` piecemeal so the
/// pipeline function can be tested in isolation.
struct PipelineContext<'a> {
    fetch: &'a FetchClient,
    render: &'a RenderClient,
    llm_router: &'a LlmRouter,
    ai_log: &'a AiLogWriter,
    extraction: &'a ExtractionCoordinator,
    catalogue: &'a CatalogueStore,
    page_registry: &'a PageRegistry,
    discovered_apis: &'a DiscoveredApiStore,
    circuits: &'a CircuitBreakerRegistry,
    oem: &'a OemConfig,
    timeouts: &'a TimeoutConfig,
    probe_config: &'a ApiProbeConfig,
    scheduler_config: &'a SchedulerConfig,
}

/// Outcome of one page's pipeline run, folded into the owning
/// [`ImportRun`]'s counters by the caller.
struct PipelineResult {
    checked: bool,
    changed: bool,
    product_upserted: bool,
    offer_upserted: bool,
    errored: bool,
    blocked_host: Option<String>,
}

impl PipelineResult {
    fn skipped() -> Self {
        Self { checked: false, changed: false, product_upserted: false, offer_upserted: false, errored: false, blocked_host: None }
    }
}

pub struct Scheduler {
    scheduler_config: SchedulerConfig,
    timeouts: TimeoutConfig,
    probe_config: ApiProbeConfig,
    oems: Vec<OemConfig>,
    worker_count: usize,

    fetch: Arc<FetchClient>,
    render: Arc<RenderClient>,
    llm_router: Arc<LlmRouter>,
    ai_log: Arc<AiLogWriter>,
    extraction: Arc<ExtractionCoordinator>,
    catalogue: Arc<CatalogueStore>,
    page_registry: Arc<PageRegistry>,
    import_runs: Arc<ImportRunStore>,
    discovered_apis: Arc<DiscoveredApiStore>,
    circuits: Arc<CircuitBreakerRegistry>,

    queue: Arc<WorkQueue>,
    active_runs: StdMutex<HashMap<OemId, ActiveRun>>,
    hosts: StdMutex<HashMap<OemId, HostState>>,
}

#[allow(clippy::too_many_arguments)]
impl Scheduler {
    pub fn new(
        scheduler_config: SchedulerConfig,
        timeouts: TimeoutConfig,
        probe_config: ApiProbeConfig,
        oems: Vec<OemConfig>,
        worker_count: usize,
        fetch: Arc<FetchClient>,
        render: Arc<RenderClient>,
        llm_router: Arc<LlmRouter>,
        ai_log: Arc<AiLogWriter>,
        extraction: Arc<ExtractionCoordinator>,
        catalogue: Arc<CatalogueStore>,
        page_registry: Arc<PageRegistry>,
        import_runs: Arc<ImportRunStore>,
        discovered_apis: Arc<DiscoveredApiStore>,
        circuits: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new(worker_count.max(1) * 4)),
            scheduler_config,
            timeouts,
            probe_config,
            oems,
            worker_count: worker_count.max(1),
            fetch,
            render,
            llm_router,
            ai_log,
            extraction,
            catalogue,
            page_registry,
            import_runs,
            discovered_apis,
            circuits,
            active_runs: StdMutex::new(HashMap::new()),
            hosts: StdMutex::new(HashMap::new()),
        }
    }

    /// Start the tick loop and worker pool as background tasks. Returns a
    /// handle that `shutdown()` drains within the configured grace window.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut workers = Vec::with_capacity(self.worker_count);
        for id in 0..self.worker_count {
            let scheduler = self.clone();
            let mut rx = shutdown_rx.clone();
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(id, &mut rx).await;
            }));
        }

        let ticker = {
            let scheduler = self.clone();
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(scheduler.scheduler_config.tick_interval_secs));
                loop {
                    tokio::select! {
                        _ = interval.tick() => scheduler.tick().await,
                        _ = rx.changed() => {
                            if *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        SchedulerHandle {
            shutdown_tx,
            ticker,
            workers,
            grace: Duration::from_secs(self.timeouts.shutdown_grace_secs),
        }
    }

    /// One scheduler tick (§4.9): for each OEM without an in-flight run,
    /// open one and enqueue its due pages; an OEM whose previous run is
    /// still draining just gets skipped this tick.
    async fn tick(&self) {
        if let Some(circuit) = self.circuits.any_hard_open() {
            tracing::warn!(circuit, "hard dependency circuit open, skipping tick");
            return;
        }

        for oem in &self.oems {
            self.tick_one(&OemId::new(oem.id.clone())).await;
        }

        metrics::gauge!("scheduler.active_runs").set(self.active_runs.lock().unwrap().len() as f64);
    }

    /// Open-a-run-and-enqueue for one OEM; shared by the tick loop and the
    /// Ingress `TriggerCrawl`/`ForceCrawlAll` entry points (§6, §4.9).
    async fn tick_one(&self, oem_id: &OemId) {
        let now = Utc::now();

        let due = match self.page_registry.get_due_pages(oem_id, now).await {
            Ok(pages) => pages,
            Err(e) => {
                tracing::error!(oem = %oem_id, %e, "failed to query due pages");
                return;
            }
        };
        if due.is_empty() {
            return;
        }

        let mut active_runs = self.active_runs.lock().unwrap();
        let entry = active_runs.entry(oem_id.clone());
        let is_new = matches!(entry, std::collections::hash_map::Entry::Vacant(_));
        let active = entry.or_insert_with(|| ActiveRun { run: ImportRun::open(oem_id.clone()), in_flight: 0 });
        let run_id = active.run.id;
        drop(active_runs);

        if is_new {
            if let Err(e) = self.import_runs.open(&self.active_runs.lock().unwrap().get(oem_id).unwrap().run).await {
                tracing::error!(oem = %oem_id, %e, "failed to open import run");
                self.active_runs.lock().unwrap().remove(oem_id);
                return;
            }
            tracing::info!(oem = %oem_id, run_id = %run_id.0, pages = due.len(), "opened import run");
        }

        self.queue.enqueue_batch(oem_id, due);
    }

    /// Ingress `TriggerCrawl` (§6): enqueue an immediate ImportRun for one
    /// OEM, outside the regular tick cadence.
    pub async fn trigger_crawl(&self, oem_id: &OemId) -> Result<(), OemWatchError> {
        if self.oem_config(oem_id).is_none() {
            return Err(OemWatchError::NotFound(format!("no configured oem {oem_id}")));
        }
        self.tick_one(oem_id).await;
        Ok(())
    }

    /// Ingress `ForceCrawlAll` (§6): clear every active page's due-cadence
    /// bookkeeping for an OEM, then trigger an immediate crawl.
    pub async fn force_crawl_all(&self, oem_id: &OemId) -> Result<(), OemWatchError> {
        if self.oem_config(oem_id).is_none() {
            return Err(OemWatchError::NotFound(format!("no configured oem {oem_id}")));
        }
        self.page_registry.reset_for_recrawl(oem_id).await?;
        self.tick_one(oem_id).await;
        Ok(())
    }

    /// OEMs this scheduler is configured to crawl, for Ingress handlers
    /// that need to enumerate them (§6).
    pub fn configured_oems(&self) -> impl Iterator<Item = &OemConfig> {
        self.oems.iter()
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler_config
    }

    async fn worker_loop(&self, worker_id: usize, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            let job = tokio::select! {
                job = self.queue.dequeue() => job,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            };
            let Some(job) = job else { return };

            self.mark_in_flight(&job.oem_id, 1);
            tracing::debug!(worker_id, oem = %job.oem_id, url = %job.page.url, "processing page");

            let deadline = Duration::from_secs(self.timeouts.job_deadline_secs);
            let outcome = tokio::time::timeout(deadline, self.run_pipeline(&job)).await;

            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(oem = %job.oem_id, url = %job.page.url, "page pipeline exceeded job deadline");
                    PipelineResult { errored: true, ..PipelineResult::skipped() }
                }
            };

            self.apply_result(&job.oem_id, &result);
            self.queue.release();
            self.mark_in_flight(&job.oem_id, -1);
            self.maybe_close_run(&job.oem_id).await;
        }
    }

    fn mark_in_flight(&self, oem_id: &OemId, delta: i64) {
        let mut active_runs = self.active_runs.lock().unwrap();
        if let Some(active) = active_runs.get_mut(oem_id) {
            active.in_flight = (active.in_flight as i64 + delta).max(0) as u32;
        }
    }

    fn apply_result(&self, oem_id: &OemId, result: &PipelineResult) {
        let mut active_runs = self.active_runs.lock().unwrap();
        let Some(active) = active_runs.get_mut(oem_id) else { return };
        if result.checked {
            active.run.counters.pages_checked += 1;
        }
        if result.changed {
            active.run.counters.pages_changed += 1;
        }
        if result.product_upserted {
            active.run.counters.products_upserted += 1;
        }
        if result.offer_upserted {
            active.run.counters.offers_upserted += 1;
        }
        if result.errored {
            active.run.counters.errors += 1;
        }
        drop(active_runs);

        if let Some(host) = &result.blocked_host {
            self.register_block(oem_id, host);
        }
    }

    /// Bump a host's Blocked counter; pause the OEM's crawl of that host
    /// once `host_block_threshold` is crossed (§4.9/§4.10).
    fn register_block(&self, oem_id: &OemId, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        let state = hosts.entry(oem_id.clone()).or_default();
        let count = state.block_counts.entry(host.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.scheduler_config.host_block_threshold {
            state.paused_until.insert(host.to_string(), Instant::now() + Duration::from_secs(self.scheduler_config.host_cooldown_secs));
            *count = 0;
            tracing::warn!(oem = %oem_id, host, "host paused for cool-down after repeated blocks");
        }
    }

    fn host_paused(&self, oem_id: &OemId, host: &str) -> bool {
        self.hosts
            .lock()
            .unwrap()
            .get(oem_id)
            .and_then(|s| s.paused_until.get(host))
            .map(|until| Instant::now() < *until)
            .unwrap_or(false)
    }

    /// Close an OEM's ImportRun once its queue lane is empty and no worker
    /// is still processing one of its pages (§4.9 step 5).
    async fn maybe_close_run(&self, oem_id: &OemId) {
        if !self.queue.is_oem_drained(oem_id) {
            return;
        }
        let finished = {
            let mut active_runs = self.active_runs.lock().unwrap();
            match active_runs.get(oem_id) {
                Some(active) if active.in_flight == 0 => active_runs.remove(oem_id),
                _ => None,
            }
        };
        let Some(mut active) = finished else { return };

        active.run.close();
        if let Err(e) = self.import_runs.close(&active.run).await {
            tracing::error!(oem = %oem_id, %e, "failed to close import run");
        }
        // Only a fully-clean run is trustworthy evidence that a page is
        // actually gone; a Partial run may have missed it due to its own
        // per-page errors, not because the site removed it.
        if active.run.status == ImportRunStatus::Completed {
            let grace_secs = self.oem_config(oem_id).map(|c| c.removal_grace_secs).unwrap_or(0);
            match self
                .catalogue
                .emit_removed_products(oem_id, active.run.started_at, grace_secs)
                .await
            {
                Ok(events) if !events.is_empty() => tracing::info!(oem = %oem_id, removed = events.len(), "reconciled removed products"),
                Err(e) => tracing::error!(oem = %oem_id, %e, "removal reconciliation failed"),
                _ => {}
            }
        }
        tracing::info!(oem = %oem_id, status = ?active.run.status, counters = ?active.run.counters, "closed import run");
    }

    fn oem_config(&self, oem_id: &OemId) -> Option<&OemConfig> {
        self.oems.iter().find(|o| o.id == oem_id.as_str())
    }

    /// The per-page pipeline (C10, §4.10): fetch cheap, diff raw_hash,
    /// render+probe+extract only when the raw body actually moved.
    async fn run_pipeline(&self, job: &CrawlJob) -> PipelineResult {
        let Some(oem) = self.oem_config(&job.oem_id) else {
            tracing::error!(oem = %job.oem_id, "no config for oem, dropping job");
            return PipelineResult { errored: true, ..PipelineResult::skipped() };
        };

        let ctx = PipelineContext {
            fetch: &self.fetch,
            render: &self.render,
            llm_router: &self.llm_router,
            ai_log: &self.ai_log,
            extraction: &self.extraction,
            catalogue: &self.catalogue,
            page_registry: &self.page_registry,
            discovered_apis: &self.discovered_apis,
            circuits: &self.circuits,
            oem,
            timeouts: &self.timeouts,
            probe_config: &self.probe_config,
            scheduler_config: &self.scheduler_config,
        };

        let host = url::Url::parse(&job.page.url).ok().and_then(|u| u.host_str().map(|h| h.to_string()));
        if let Some(host) = &host {
            if self.host_paused(&job.oem_id, host) {
                return PipelineResult::skipped();
            }
        }

        process_page(&ctx, &job.page).await
    }
}

/// Handle returned by [`Scheduler::start`]; `shutdown()` signals workers to
/// stop drawing new jobs and waits up to the configured grace window for
/// in-flight pages to finish (§4.9 Cancellation, §5).
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.ticker.abort();

        let drain = async {
            for worker in self.workers {
                let _ = worker.await;
            }
        };

        if tokio::time::timeout(self.grace, drain).await.is_err() {
            tracing::warn!("shutdown grace window elapsed with workers still in flight");
        }
    }
}

/// Run the fetch → diff → render → diff → extract → upsert chain for one
/// page, recording the outcome against the Page Registry regardless of
/// which branch it took (§4.10).
async fn process_page(ctx: &PipelineContext<'_>, page: &SourcePage) -> PipelineResult {
    let now = Utc::now();

    let fetched = match ctx
        .fetch
        .fetch(&page.url, None, Duration::from_secs(ctx.timeouts.http_fetch_secs))
        .await
    {
        Ok(fetched) => fetched,
        Err(e) => return handle_fetch_error(ctx, page, e, now).await,
    };

    ctx.circuits.fetch.record_success();
    let new_raw_hash = raw_hash(&fetched.body);

    if page.last_hash.as_deref() == Some(new_raw_hash.as_str()) {
        let _ = ctx
            .page_registry
            .record_check(
                page.id,
                CheckOutcome::NoChange { raw_hash: new_raw_hash },
                now,
                ctx.scheduler_config.consecutive_not_found_threshold,
                ctx.scheduler_config.consecutive_blocked_threshold,
            )
            .await;
        return PipelineResult { checked: true, ..PipelineResult::skipped() };
    }

    if let Some(payload) = try_replay(ctx, page).await {
        return finish_via_replay(ctx, page, new_raw_hash, payload, now).await;
    }

    let rendered = match ctx.render.render(&page.url, WaitPolicy::default(), false).await {
        Ok(rendered) => rendered,
        Err(e) => return handle_render_error(ctx, page, new_raw_hash, e, now).await,
    };
    ctx.circuits.render.record_success();

    persist_discovered_apis(ctx, page, &rendered.network).await;

    let new_rendered_hash = rendered_hash(&rendered.html);
    if page.last_rendered_hash.as_deref() == Some(new_rendered_hash.as_str()) {
        let _ = ctx
            .page_registry
            .record_check(
                page.id,
                CheckOutcome::RenderedNoChange { raw_hash: new_raw_hash, rendered_hash: new_rendered_hash },
                now,
                ctx.scheduler_config.consecutive_not_found_threshold,
                ctx.scheduler_config.consecutive_blocked_threshold,
            )
            .await;
        return PipelineResult { checked: true, ..PipelineResult::skipped() };
    }

    let api_payload = select_api_payload(&rendered.network, page.page_type);
    let api_mapping = api_mapping_for(ctx.oem, page.page_type);
    let normalized_text = oemwatch_common::normalize::extract_normalized_text(&rendered.html);
    let dom_selectors = ctx.oem.selectors.get(&page.page_type);

    let inputs = ExtractionInputs {
        api_payload: api_payload.as_ref(),
        api_mapping: api_mapping.as_ref(),
        rendered_html: Some(&rendered.html),
        dom_selectors,
        normalized_text: Some(&normalized_text),
    };

    let extraction = ctx
        .extraction
        .extract_product(&page.oem_id, page.page_type, inputs, ctx.llm_router, ctx.ai_log)
        .await;

    let mut result = PipelineResult {
        checked: true,
        changed: true,
        product_upserted: false,
        offer_upserted: false,
        errored: false,
        blocked_host: None,
    };

    if let Some(outcome) = extraction {
        let oem_id = page.oem_id.clone();
        if page.page_type == PageType::Offers {
            let candidate = product_candidate_to_offer(outcome.candidate);
            match ctx.catalogue.upsert_offer(&oem_id, candidate, &ctx.oem.critical_fields).await {
                Ok((_, UpsertOutcome::Created(_) | UpsertOutcome::Updated(_))) => result.offer_upserted = true,
                Ok((_, UpsertOutcome::Unchanged)) => {}
                Err(e) => {
                    tracing::error!(%e, url = %page.url, "offer upsert failed");
                    result.errored = true;
                }
            }
        } else {
            match ctx.catalogue.upsert_product(&oem_id, outcome.candidate, &ctx.oem.critical_fields).await {
                Ok((_, UpsertOutcome::Created(_) | UpsertOutcome::Updated(_))) => result.product_upserted = true,
                Ok((_, UpsertOutcome::Unchanged)) => {}
                Err(e) => {
                    tracing::error!(%e, url = %page.url, "product upsert failed");
                    result.errored = true;
                }
            }
        }
    } else {
        tracing::warn!(url = %page.url, "no extraction strategy reached the confidence threshold");
        result.errored = true;
    }

    let _ = ctx
        .page_registry
        .record_check(
            page.id,
            CheckOutcome::Changed { raw_hash: new_raw_hash, rendered_hash: new_rendered_hash },
            now,
            ctx.scheduler_config.consecutive_not_found_threshold,
            ctx.scheduler_config.consecutive_blocked_threshold,
        )
        .await;

    result
}

/// Cool-down between replay attempts of the same endpoint after a
/// failure — not itself a severity/threshold knob, so it isn't part of
/// `ApiProbeConfig` (§4.4).
const REPLAY_COOLDOWN: Duration = Duration::from_secs(300);

/// Replay decision (§4.4): if a reliable DiscoveredAPI of the right shape
/// is known for this OEM, fetch it directly via the HTTP Fetcher instead
/// of spending a render session (S3). Returns the parsed payload on a
/// successful replay.
async fn try_replay(ctx: &PipelineContext<'_>, page: &SourcePage) -> Option<serde_json::Value> {
    let wanted = if page.page_type == PageType::Offers { ApiDataType::Offers } else { ApiDataType::Products };
    let now = Utc::now();

    let candidates = ctx.discovered_apis.active_for_oem(&page.oem_id).await.ok()?;
    let mut api = candidates
        .into_iter()
        .find(|a| a.data_type == wanted && probe::should_replay(a, ctx.probe_config, REPLAY_COOLDOWN, now))?;

    match ctx
        .fetch
        .fetch(&api.url_template, Some(api.required_headers.clone()), Duration::from_secs(ctx.timeouts.http_fetch_secs))
        .await
    {
        Ok(fetched) => match serde_json::from_slice::<serde_json::Value>(&fetched.body) {
            Ok(payload) => {
                probe::record_success(&mut api, ctx.probe_config);
                let _ = ctx.discovered_apis.record_outcome(&api).await;
                Some(payload)
            }
            Err(e) => {
                tracing::warn!(url = %api.url_template, %e, "replayed api body did not parse as JSON");
                probe::record_failure(&mut api, ctx.probe_config);
                let _ = ctx.discovered_apis.record_outcome(&api).await;
                None
            }
        },
        Err(e) => {
            tracing::warn!(url = %api.url_template, %e, "api replay failed, falling back to render");
            probe::record_failure(&mut api, ctx.probe_config);
            let _ = ctx.discovered_apis.record_outcome(&api).await;
            None
        }
    }
}

/// Finish a page whose content moved via a replayed API rather than a
/// render: extraction runs Direct-API only (no DOM/LLM inputs available),
/// and the outcome is always treated as a content change since a replay is
/// only attempted once the raw body has already been observed to differ.
async fn finish_via_replay(ctx: &PipelineContext<'_>, page: &SourcePage, new_raw_hash: String, payload: serde_json::Value, now: chrono::DateTime<Utc>) -> PipelineResult {
    let new_rendered_hash = raw_hash(&serde_json::to_vec(&payload).unwrap_or_default());
    let api_mapping = api_mapping_for(ctx.oem, page.page_type);

    let inputs = ExtractionInputs {
        api_payload: Some(&payload),
        api_mapping: api_mapping.as_ref(),
        rendered_html: None,
        dom_selectors: None,
        normalized_text: None,
    };

    let extraction = ctx.extraction.extract_product(&page.oem_id, page.page_type, inputs, ctx.llm_router, ctx.ai_log).await;

    let mut result = PipelineResult { checked: true, changed: true, ..PipelineResult::skipped() };

    if let Some(outcome) = extraction {
        if page.page_type == PageType::Offers {
            let candidate = product_candidate_to_offer(outcome.candidate);
            match ctx.catalogue.upsert_offer(&page.oem_id, candidate, &ctx.oem.critical_fields).await {
                Ok((_, UpsertOutcome::Created(_) | UpsertOutcome::Updated(_))) => result.offer_upserted = true,
                Ok((_, UpsertOutcome::Unchanged)) => {}
                Err(e) => {
                    tracing::error!(%e, url = %page.url, "offer upsert failed after replay");
                    result.errored = true;
                }
            }
        } else {
            match ctx.catalogue.upsert_product(&page.oem_id, outcome.candidate, &ctx.oem.critical_fields).await {
                Ok((_, UpsertOutcome::Created(_) | UpsertOutcome::Updated(_))) => result.product_upserted = true,
                Ok((_, UpsertOutcome::Unchanged)) => {}
                Err(e) => {
                    tracing::error!(%e, url = %page.url, "product upsert failed after replay");
                    result.errored = true;
                }
            }
        }
    } else {
        tracing::warn!(url = %page.url, "direct-api extraction failed to clear the confidence threshold after replay");
        result.errored = true;
    }

    let _ = ctx
        .page_registry
        .record_check(
            page.id,
            CheckOutcome::Changed { raw_hash: new_raw_hash, rendered_hash: new_rendered_hash },
            now,
            ctx.scheduler_config.consecutive_not_found_threshold,
            ctx.scheduler_config.consecutive_blocked_threshold,
        )
        .await;

    result
}

async fn handle_fetch_error(ctx: &PipelineContext<'_>, page: &SourcePage, e: crate::clients::FetchClientError, now: chrono::DateTime<Utc>) -> PipelineResult {
    let err: OemWatchError = e.into();
    match err {
        OemWatchError::TransientNetwork(msg) | OemWatchError::Timeout(msg) => {
            ctx.circuits.fetch.record_failure();
            tracing::warn!(url = %page.url, %msg, "transient fetch failure, retrying next tick");
            PipelineResult { errored: true, ..PipelineResult::skipped() }
        }
        OemWatchError::PermanentPageError(_) => {
            let _ = ctx
                .page_registry
                .record_check(
                    page.id,
                    CheckOutcome::NotFound,
                    now,
                    ctx.scheduler_config.consecutive_not_found_threshold,
                    ctx.scheduler_config.consecutive_blocked_threshold,
                )
                .await;
            PipelineResult { checked: true, errored: true, ..PipelineResult::skipped() }
        }
        OemWatchError::Blocked(_) => {
            let _ = ctx
                .page_registry
                .record_check(
                    page.id,
                    CheckOutcome::Blocked,
                    now,
                    ctx.scheduler_config.consecutive_not_found_threshold,
                    ctx.scheduler_config.consecutive_blocked_threshold,
                )
                .await;
            let host = url::Url::parse(&page.url).ok().and_then(|u| u.host_str().map(|h| h.to_string()));
            PipelineResult { checked: true, errored: true, blocked_host: host, ..PipelineResult::skipped() }
        }
        other => {
            ctx.circuits.fetch.record_failure();
            let _ = ctx
                .page_registry
                .record_check(
                    page.id,
                    CheckOutcome::Error { message: other.to_string() },
                    now,
                    ctx.scheduler_config.consecutive_not_found_threshold,
                    ctx.scheduler_config.consecutive_blocked_threshold,
                )
                .await;
            PipelineResult { checked: true, errored: true, ..PipelineResult::skipped() }
        }
    }
}

async fn handle_render_error(ctx: &PipelineContext<'_>, page: &SourcePage, raw_hash: String, e: crate::clients::RenderClientError, now: chrono::DateTime<Utc>) -> PipelineResult {
    ctx.circuits.render.record_failure();
    let err: OemWatchError = e.into();
    tracing::warn!(url = %page.url, %err, "render failed");
    let _ = ctx
        .page_registry
        .record_check(
            page.id,
            CheckOutcome::Error { message: err.to_string() },
            now,
            ctx.scheduler_config.consecutive_not_found_threshold,
            ctx.scheduler_config.consecutive_blocked_threshold,
        )
        .await;
    let _ = raw_hash;
    PipelineResult { checked: true, errored: true, ..PipelineResult::skipped() }
}

/// Persist every candidate endpoint nominated from this render's network
/// trace and update the reliability of any that were already known and
/// happened to be re-observed (§4.4).
async fn persist_discovered_apis(ctx: &PipelineContext<'_>, page: &SourcePage, trace: &oemwatch_common::api::render::NetworkTrace) {
    for candidate in probe::extract_candidates(trace) {
        if let Err(e) = ctx
            .discovered_apis
            .upsert_candidate(&page.oem_id, &candidate.url_template, &candidate.method, &candidate.required_headers, candidate.data_type)
            .await
        {
            tracing::error!(%e, "failed to persist discovered api candidate");
        }
    }
}

/// Pick a nominated API payload from this render's trace matching the
/// page's semantic kind, for the Direct-API extraction strategy (§4.5).
fn select_api_payload(trace: &oemwatch_common::api::render::NetworkTrace, page_type: PageType) -> Option<serde_json::Value> {
    let wanted = if page_type == PageType::Offers { ApiDataType::Offers } else { ApiDataType::Products };
    probe::extract_candidates(trace).into_iter().find(|c| c.data_type == wanted).map(|c| c.payload)
}

fn api_mapping_for(oem: &OemConfig, page_type: PageType) -> Option<ApiFieldMapping> {
    let key = if page_type == PageType::Offers { "offers" } else { "products" };
    oem.api_mappings.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Adapt a product-shaped extraction result into an [`OfferCandidate`].
/// OEM offer pages carry one flat promotional blob rather than the
/// multi-field structure a dedicated offer extractor would need, so the
/// product-extraction ladder's result is reused rather than duplicated
/// (§4.5/§4.7).
fn product_candidate_to_offer(candidate: crate::store::ProductCandidate) -> OfferCandidate {
    OfferCandidate {
        external_key: candidate.external_key,
        offer_type: candidate.subtitle.unwrap_or_else(|| "general".to_string()),
        applicable_models: Vec::new(),
        validity_start: None,
        validity_end: None,
        saving_amount: candidate.price,
        meta: candidate.meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_adapter_carries_price_as_saving() {
        let candidate = crate::store::ProductCandidate {
            external_key: "summer-sale".into(),
            title: "Summer Sale".into(),
            subtitle: Some("finance".into()),
            body_type: None,
            fuel_type: None,
            availability: oemwatch_common::types::Availability::Available,
            price: Some(oemwatch_common::types::Price {
                amount_minor_units: 500_000,
                currency: "AUD".into(),
                price_type: "saving".into(),
                raw_string: "$5,000".into(),
            }),
            key_features: vec![],
            variants: vec![],
            cta_links: vec![],
            meta: HashMap::new(),
        };
        let offer = product_candidate_to_offer(candidate);
        assert_eq!(offer.offer_type, "finance");
        assert_eq!(offer.saving_amount.unwrap().amount_minor_units, 500_000);
    }
}

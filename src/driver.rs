use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::browser::{ChromeSession, PageContext, Session};
use crate::chunks;
use crate::error::HarvestError;
use crate::parser::descriptor;
use crate::reduce::{self, ResultSet};
use crate::scanner::{self, ScanStats};
use crate::service_worker;
use crate::settings::Settings;

const READY_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Launching,
    Ready,
    Harvesting,
    Scanning,
    Reducing,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Launching => "launching",
            Phase::Ready => "ready",
            Phase::Harvesting => "harvesting",
            Phase::Scanning => "scanning",
            Phase::Reducing => "reducing",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Phases a run has gone through, in order.
#[derive(Debug)]
pub struct PhaseTrace {
    phases: Vec<Phase>,
}

impl PhaseTrace {
    pub fn new() -> Self {
        Self {
            phases: vec![Phase::Idle],
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        info!("Phase: {}", phase);
        self.phases.push(phase);
    }

    pub fn current(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Idle)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }
}

impl Default for PhaseTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one run with the counters printed at the end.
#[derive(Debug)]
pub struct RunReport {
    pub result: ResultSet,
    pub registry_ready: bool,
    pub chunk_candidates: usize,
    pub manifest_entries: usize,
    pub selected_bundles: usize,
    pub scan: ScanStats,
    pub elapsed: Duration,
}

/// Launch Chrome, run the pipeline and release the browser on every path.
pub async fn run(settings: &Settings, limit: Option<usize>) -> Result<RunReport, HarvestError> {
    run_with(settings, limit, || ChromeSession::launch(settings)).await
}

/// Same as [`run`] with the session supplied by `launch`. The session is
/// closed exactly once whatever the pipeline returns; a failed launch has
/// nothing to close.
pub async fn run_with<S, L, F>(
    settings: &Settings,
    limit: Option<usize>,
    launch: L,
) -> Result<RunReport, HarvestError>
where
    S: Session,
    L: FnOnce() -> F,
    F: Future<Output = Result<S, HarvestError>>,
{
    let mut trace = PhaseTrace::new();
    trace.enter(Phase::Launching);
    let session = launch().await?;

    let report = run_pipeline(&session, settings, limit, &mut trace).await;
    if let Err(e) = &report {
        error!(fatal = e.is_fatal(), "Run aborted while {}: {}", trace.current(), e);
    }

    session.close();
    trace.enter(Phase::Closed);
    debug!("Phases: {:?}", trace.phases());
    report
}

/// Navigate, harvest, discover, scan and reduce on an already launched page.
pub async fn run_pipeline<P: PageContext + ?Sized>(
    page: &P,
    settings: &Settings,
    limit: Option<usize>,
    trace: &mut PhaseTrace,
) -> Result<RunReport, HarvestError> {
    let t0 = Instant::now();

    info!("Navigating to {}", settings.entry_url);
    page.navigate(&settings.entry_url).await?;
    let registry_ready = wait_for_registry(page, &settings.chunk_registry, settings.ready_timeout()).await;
    trace.enter(Phase::Ready);

    trace.enter(Phase::Harvesting);
    let chunk_text = chunks::harvest_chunks(page, &settings.chunk_registry).await;
    let chunk_candidates = descriptor::extract_candidates(&chunk_text, settings.minimal_window);
    info!(
        "Harvested {} bytes of chunk source ({} candidates)",
        chunk_text.len(),
        chunk_candidates.len()
    );

    let manifest = service_worker::discover_bundles(page, &settings.service_worker_url).await;
    let mut selected = scanner::select_bundles(
        &manifest,
        &settings.service_worker_url,
        &settings.bundle_prefixes,
    );
    if let Some(n) = limit {
        selected.truncate(n);
    }
    info!("Selected {} of {} bundles", selected.len(), manifest.len());

    trace.enter(Phase::Scanning);
    let (bundle_candidates, scan) = scanner::scan_bundles(
        page,
        &selected,
        settings.minimal_window,
        settings.progress_every,
    )
    .await;

    trace.enter(Phase::Reducing);
    let chunk_count = chunk_candidates.len();
    let result = reduce::reduce(
        chunk_candidates.into_iter().chain(bundle_candidates),
        Utc::now(),
    );

    Ok(RunReport {
        result,
        registry_ready,
        chunk_candidates: chunk_count,
        manifest_entries: manifest.len(),
        selected_bundles: selected.len(),
        scan,
        elapsed: t0.elapsed(),
    })
}

/// Poll the chunk registry until it has entries or `timeout` passes.
/// Returns whether it became ready; a timeout is not an error.
pub async fn wait_for_registry<P: PageContext + ?Sized>(
    page: &P,
    registry: &str,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let size = chunks::registry_size(page, registry).await;
        if size > 0 {
            info!("Chunk registry ready ({} entries)", size);
            return true;
        }
        if Instant::now() >= deadline {
            warn!("Chunk registry still empty after {:?}, continuing", timeout);
            return false;
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::browser::mock::MockPage;

    const SW: &str = "https://x.com/sw.js";

    fn settings() -> Settings {
        let mut s = Settings::defaults().unwrap();
        s.ready_timeout_secs = 0;
        s
    }

    fn sw_body() -> String {
        r#"self.ASSETS=["https://abs.twimg.com/rw/main.1.js","https://abs.twimg.com/rw/i18n/en.2.js","https://abs.twimg.com/rw/ondemand.Profile.3.js","https://abs.twimg.com/rw/app.css"];"#
            .to_string()
    }

    fn chunk_source() -> serde_json::Value {
        json!(r#"e=>{e.exports={queryId:"chunkhash0001",operationName:"Bookmarks",operationType:"query"}}"#)
    }

    #[tokio::test]
    async fn full_pipeline() {
        let page = MockPage::new()
            .with_eval("r.length", json!(3))
            .with_eval("flatMap", chunk_source())
            .with_fetch(SW, &sw_body())
            .with_fetch(
                "https://abs.twimg.com/rw/main.1.js",
                r#"{queryId:"richhash00001",operationName:"Bookmarks",featureSwitches:["a","b"]}"#,
            )
            .with_fetch(
                "https://abs.twimg.com/rw/ondemand.Profile.3.js",
                r#"{queryId:"profilehash01",operationName:"UserByRestId",featureSwitches:["a"]}{queryId:"tiny",operationName:"Tiny"}"#,
            );

        let mut trace = PhaseTrace::new();
        let report = run_pipeline(&page, &settings(), None, &mut trace).await.unwrap();

        assert!(report.registry_ready);
        assert_eq!(report.chunk_candidates, 1);
        assert_eq!(report.manifest_entries, 3);
        assert_eq!(report.selected_bundles, 2);
        assert_eq!(report.scan.ok, 2);
        assert_eq!(report.scan.errors, 0);

        let names: Vec<&str> = report.result.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Bookmarks", "UserByRestId"]);
        // bundle-derived rich record replaces the chunk-derived minimal one
        assert_eq!(report.result.endpoints[0].hash, "richhash00001");
        assert_eq!(report.result.endpoints[0].features, vec!["a", "b"]);
        assert_eq!(report.result.count, 2);

        assert_eq!(
            trace.phases(),
            &[
                Phase::Idle,
                Phase::Ready,
                Phase::Harvesting,
                Phase::Scanning,
                Phase::Reducing
            ]
        );

        let calls = page.calls();
        assert_eq!(calls[0], "navigate:https://x.com/explore");
        let fetches: Vec<&String> = calls.iter().filter(|c| c.starts_with("fetch:")).collect();
        assert_eq!(
            fetches,
            vec![
                &format!("fetch:{SW}"),
                &"fetch:https://abs.twimg.com/rw/main.1.js".to_string(),
                &"fetch:https://abs.twimg.com/rw/ondemand.Profile.3.js".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn degraded_run_still_completes() {
        // empty registry, no service worker: zero endpoints, not an error
        let page = MockPage::new();
        let mut trace = PhaseTrace::new();
        let report = run_pipeline(&page, &settings(), None, &mut trace).await.unwrap();

        assert!(!report.registry_ready);
        assert_eq!(report.result.count, 0);
        assert_eq!(report.selected_bundles, 0);
        assert_eq!(trace.current(), Phase::Reducing);
    }

    #[tokio::test]
    async fn navigation_failure_is_fatal() {
        let page = MockPage::new().with_navigation_error("net::ERR_CONNECTION_REFUSED");
        let mut trace = PhaseTrace::new();
        let err = run_pipeline(&page, &settings(), None, &mut trace).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(trace.current(), Phase::Idle);
        assert_eq!(page.calls(), vec!["navigate:https://x.com/explore"]);
    }

    #[tokio::test]
    async fn session_closed_once_after_fatal_navigation() {
        let page = MockPage::new().with_navigation_error("net::ERR_CONNECTION_REFUSED");
        let closes = page.close_counter();

        let err = run_with(&settings(), None, move || async move { Ok(page) })
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_closed_once_after_success() {
        let page = MockPage::new().with_fetch(SW, &sw_body());
        let closes = page.close_counter();

        let report = run_with(&settings(), None, move || async move { Ok(page) }).await.unwrap();

        assert_eq!(report.manifest_entries, 3);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_failure_propagates() {
        let err = run_with(&settings(), None, || async {
            Err::<MockPage, _>(HarvestError::Launch("no chrome".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn limit_caps_scanned_bundles() {
        let page = MockPage::new().with_fetch(SW, &sw_body());
        let mut trace = PhaseTrace::new();
        let report = run_pipeline(&page, &settings(), Some(1), &mut trace).await.unwrap();

        assert_eq!(report.selected_bundles, 1);
        assert_eq!(report.scan.total, 1);
        assert_eq!(report.scan.errors, 1);
    }

    #[tokio::test]
    async fn readiness_wait_times_out() {
        let page = MockPage::new().with_eval("r.length", json!(0));
        let ready = wait_for_registry(&page, "webpackChunk_app", Duration::from_millis(600)).await;
        assert!(!ready);
        // polled at least twice before giving up
        assert!(page.calls().len() >= 2);
    }
}

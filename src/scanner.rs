use std::collections::HashSet;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::PageContext;
use crate::parser::descriptor;
use crate::parser::Candidate;

/// Scan stats returned after completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub candidates: usize,
}

/// Resolve manifest entries against `base` and keep the bundles worth
/// scanning: `.js` files whose name starts with one of `prefixes`.
/// Duplicates are dropped, first occurrence wins.
pub fn select_bundles(entries: &[String], base: &str, prefixes: &[String]) -> Vec<String> {
    let base = Url::parse(base).ok();
    let mut seen = HashSet::new();

    entries
        .iter()
        .filter_map(|entry| resolve(base.as_ref(), entry))
        .filter(|url| {
            let name = file_name(url);
            name.ends_with(".js") && prefixes.iter().any(|p| name.starts_with(p.as_str()))
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn resolve(base: Option<&Url>, entry: &str) -> Option<String> {
    match base {
        Some(base) => base.join(entry).ok().map(String::from),
        None => Url::parse(entry).ok().map(String::from),
    }
}

fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Fetch each bundle in order through the page and extract candidates.
/// A failed fetch is logged and skipped; there are no retries.
pub async fn scan_bundles<P: PageContext + ?Sized>(
    page: &P,
    urls: &[String],
    minimal_window: usize,
    progress_every: usize,
) -> (Vec<Candidate>, ScanStats) {
    let total = urls.len();
    let mut stats = ScanStats {
        total,
        ..Default::default()
    };
    let mut candidates = Vec::new();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} bundles ({msg})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for (i, url) in urls.iter().enumerate() {
        let start = Instant::now();
        match page.fetch_text(url).await {
            Ok(body) => {
                let found = descriptor::extract_candidates(&body, minimal_window);
                debug!(
                    "{}: {} bytes, {} candidates in {}ms",
                    url,
                    body.len(),
                    found.len(),
                    start.elapsed().as_millis()
                );
                stats.ok += 1;
                stats.candidates += found.len();
                candidates.extend(found);
            }
            Err(e) => {
                warn!("Skipping bundle: {}", e);
                stats.errors += 1;
            }
        }

        pb.set_message(format!("{} candidates", stats.candidates));
        pb.inc(1);
        let done = i + 1;
        if progress_every > 0 && (done % progress_every == 0 || done == total) {
            info!("Scanned {}/{} bundles ({} candidates)", done, total, stats.candidates);
        }
    }

    pb.finish_and_clear();
    info!(
        "Scanned {} bundles ({} ok, {} errors, {} candidates)",
        stats.total, stats.ok, stats.errors, stats.candidates
    );
    (candidates, stats)
}

use tracing::{info, warn};

use crate::browser::PageContext;
use crate::parser::manifest;

/// Fetch the service worker through the page and return the script entries
/// of its asset list. Any failure yields an empty list.
pub async fn discover_bundles<P: PageContext + ?Sized>(page: &P, sw_url: &str) -> Vec<String> {
    let source = match page.fetch_text(sw_url).await {
        Ok(source) => source,
        Err(e) => {
            warn!("Service worker unavailable: {}", e);
            return Vec::new();
        }
    };

    let scripts = manifest::script_assets(&source);
    if scripts.is_empty() {
        warn!("No asset list in {} ({} bytes)", sw_url, source.len());
    } else {
        info!("Service worker lists {} scripts", scripts.len());
    }
    scripts
}

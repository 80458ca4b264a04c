//! Harvest module factories from the page's webpack chunk registry.
//!
//! The registry (`self.webpackChunk_<app>`) is an array of
//! `[chunkIds, {moduleId: factory}, runtime?]` entries pushed as chunks load.
//! Stringifying the factories recovers descriptors registered by code paths
//! the entry bundle alone does not contain.

use tracing::{debug, warn};

use crate::browser::PageContext;

fn registry_ref(registry: &str) -> String {
    let quoted = serde_json::to_string(registry).unwrap_or_else(|_| "\"\"".to_string());
    format!("self[{quoted}]")
}

/// Expression yielding the registry's entry count, 0 when absent.
pub fn registry_size_expression(registry: &str) -> String {
    format!(
        "(() => {{ const r = {}; return Array.isArray(r) ? r.length : 0; }})()",
        registry_ref(registry)
    )
}

/// Expression yielding every factory's source joined by newlines.
pub fn harvest_expression(registry: &str) -> String {
    format!(
        r#"(() => {{
    const registry = {};
    if (!Array.isArray(registry)) return "";
    return registry
        .filter((entry) => entry && entry[1])
        .flatMap((entry) => Object.values(entry[1]))
        .map((factory) => String(factory))
        .join("\n");
}})()"#,
        registry_ref(registry)
    )
}

/// Current number of registry entries. Evaluation failures count as 0.
pub async fn registry_size<P: PageContext + ?Sized>(page: &P, registry: &str) -> usize {
    match page.evaluate(&registry_size_expression(registry)).await {
        Ok(value) => value.as_u64().unwrap_or(0) as usize,
        Err(e) => {
            debug!("Registry size check failed: {}", e);
            0
        }
    }
}

/// Concatenated factory sources, or an empty string when the registry is
/// missing or the evaluation fails.
pub async fn harvest_chunks<P: PageContext + ?Sized>(page: &P, registry: &str) -> String {
    match page.evaluate(&harvest_expression(registry)).await {
        Ok(value) => match value.as_str() {
            Some(text) => text.to_string(),
            None => {
                warn!("Chunk registry {} not populated", registry);
                String::new()
            }
        },
        Err(e) => {
            warn!("Chunk harvest failed: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::browser::mock::MockPage;

    const REGISTRY: &str = "webpackChunk_twitter_responsive_web";

    #[test]
    fn expressions_reference_registry() {
        let size = registry_size_expression(REGISTRY);
        assert!(size.contains(r#"self["webpackChunk_twitter_responsive_web"]"#));
        assert!(size.contains("r.length"));

        let harvest = harvest_expression(REGISTRY);
        assert!(harvest.contains(r#"self["webpackChunk_twitter_responsive_web"]"#));
        assert!(harvest.contains("flatMap"));
        assert!(!harvest.contains("r.length"));
    }

    #[tokio::test]
    async fn harvest_returns_joined_text() {
        let page = MockPage::new().with_eval("flatMap", json!("e=>{e.exports={}}\nfunction(){}"));
        let text = harvest_chunks(&page, REGISTRY).await;
        assert_eq!(text, "e=>{e.exports={}}\nfunction(){}");
    }

    #[tokio::test]
    async fn absent_registry_is_empty() {
        let page = MockPage::new();
        assert_eq!(harvest_chunks(&page, REGISTRY).await, "");
        assert_eq!(registry_size(&page, REGISTRY).await, 0);
    }

    #[tokio::test]
    async fn size_reads_number() {
        let page = MockPage::new().with_eval("r.length", json!(7));
        assert_eq!(registry_size(&page, REGISTRY).await, 7);
    }
}

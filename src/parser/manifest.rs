//! Asset list embedded in the service worker script, e.g.
//! `self.ASSETS=["https://abs.twimg.com/.../main.8b1a.js", ...]`.

use std::sync::LazyLock;

use regex::Regex;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bASSETS\s*=\s*\[").unwrap());
static STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|'([^']*)'"#).unwrap());

/// Every quoted entry of the asset list, in source order. Empty when the
/// marker is missing.
pub fn asset_list(sw_source: &str) -> Vec<String> {
    let Some(marker) = MARKER_RE.find(sw_source) else {
        return Vec::new();
    };
    let rest = &sw_source[marker.end()..];
    let span = &rest[..rest.find(']').unwrap_or(rest.len())];

    STRING_RE
        .captures_iter(span)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Asset list entries that are JavaScript files.
pub fn script_assets(sw_source: &str) -> Vec<String> {
    asset_list(sw_source)
        .into_iter()
        .filter(|entry| is_script(entry))
        .collect()
}

fn is_script(entry: &str) -> bool {
    let path = entry.split(['?', '#']).next().unwrap_or(entry);
    path.ends_with(".js")
}

//! Operation descriptor extraction from minified bundle text.
//!
//! Bundles emit the descriptor in two shapes. The rich one carries the
//! feature switch list:
//!
//! ```text
//! {queryId:"abc",operationName:"Foo",operationType:"query",metadata:{featureSwitches:["a","b"]}}
//! ```
//!
//! Fallback modules only carry the id and the name. Both passes run over the
//! whole text and their output is concatenated; merging is left to
//! [`crate::reduce`].

use std::sync::LazyLock;

use regex::Regex;

use super::Candidate;

/// Default bound on the text between `queryId` and `operationName` in the
/// minimal form.
pub const DEFAULT_MINIMAL_WINDOW: usize = 500;

static RICH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"queryId:\s*"([^"]+)"[^}]*?operationName:\s*"([^"]+)"[^}]*?featureSwitches:\s*\[([^\]]*)\]"#,
    )
    .unwrap()
});
static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).unwrap());
static QUERY_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"queryId:\s*"(\w+)""#).unwrap());
static OPERATION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"operationName:\s*"(\w+)""#).unwrap());

/// Run both passes and concatenate: rich matches first, then minimal ones.
pub fn extract_candidates(source: &str, minimal_window: usize) -> Vec<Candidate> {
    let mut out = extract_rich(source);
    out.extend(extract_minimal(source, minimal_window));
    out
}

/// Rich form: `queryId`, `operationName`, `featureSwitches:[...]` in that
/// order, never crossing a `}`.
pub fn extract_rich(source: &str) -> Vec<Candidate> {
    RICH_RE
        .captures_iter(source)
        .map(|caps| {
            let features = QUOTED_RE
                .captures_iter(&caps[3])
                .map(|f| f[1].to_string())
                .collect();
            Candidate::new(&caps[2], &caps[1], features)
        })
        .collect()
}

/// Minimal form: `queryId:"<word>"` followed within `window` characters by
/// `operationName:"<word>"`, with no `}` in between. Features are empty.
pub fn extract_minimal(source: &str, window: usize) -> Vec<Candidate> {
    let mut out = Vec::new();
    // Resume point after the last accepted match, so matches never overlap.
    let mut consumed = 0;

    for caps in QUERY_ID_RE.captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() < consumed {
            continue;
        }
        let rest = &source[whole.end()..];
        let scope = &rest[..rest.find('}').unwrap_or(rest.len())];
        let Some(name) = OPERATION_NAME_RE.captures(scope) else {
            continue;
        };
        let Some(name_match) = name.get(0) else { continue };
        if scope[..name_match.start()].chars().count() > window {
            continue;
        }
        out.push(Candidate::new(&name[1], &caps[1], Vec::new()));
        consumed = whole.end() + name_match.end();
    }

    out
}

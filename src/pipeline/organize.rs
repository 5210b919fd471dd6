//! Turning raw search hits into the source list a report is built on

use std::collections::HashSet;

use crate::state::Source;

/// Dedupe and rank search hits, keeping at most `max_sources`.
///
/// Hits without a URL are dropped. Duplicates (by normalized URL) keep their
/// first occurrence. Hits with a snippet rank ahead of bare links; otherwise
/// the provider's order is kept. Ids are made unique within the list.
pub fn organize_sources(hits: Vec<Source>, max_sources: usize) -> Vec<Source> {
    let mut seen_urls = HashSet::new();
    let mut kept: Vec<Source> = hits
        .into_iter()
        .filter_map(|hit| {
            let url = hit.url.trim().to_string();
            if url.is_empty() || !seen_urls.insert(normalize_url(&url)) {
                return None;
            }
            let title = match hit.title.trim() {
                "" => url.clone(),
                title => title.to_string(),
            };
            Some(Source {
                id: hit.id.trim().to_string(),
                title,
                snippet: hit.snippet.trim().to_string(),
                url,
            })
        })
        .collect();

    // stable, so ties keep provider rank
    kept.sort_by_key(|s| s.snippet.is_empty());
    kept.truncate(max_sources);

    let mut ids = HashSet::new();
    for (i, source) in kept.iter_mut().enumerate() {
        if source.id.is_empty() || ids.contains(&source.id) {
            source.id = format!("source-{}", i + 1);
        }
        // a generated id can still collide with a provider id
        while !ids.insert(source.id.clone()) {
            source.id.push('x');
        }
    }

    kept
}

/// Key used to spot the same page reached through a different URL
fn normalize_url(url: &str) -> String {
    let lowered = url.trim().to_ascii_lowercase();
    let without_fragment = lowered.split('#').next().unwrap_or_default();
    let without_scheme = without_fragment
        .strip_prefix("https://")
        .or_else(|| without_fragment.strip_prefix("http://"))
        .unwrap_or(without_fragment);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

//! Company-name normalization and search-result matching.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::model::SearchResult;

// whitespace (incl. full-width and zero-width space), dashes, dots, commas, bars
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\s\u{3000}\u{200B}\-\u{2010}-\u{2015}\u{2212}\u{00B7}\u{2022}\u{30FB}.,，。、|｜]")
        .expect("punctuation pattern")
});

static NAVIGATION_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("官方网站|官方網站|官网|首页|首頁|公司簡介|關於我們|关于我们|公司简介|Home|About")
        .expect("navigation pattern")
});

// separators that split a result title into brand / site-name segments
static TITLE_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[|｜\-\u{2013}\u{2014}_:：·•]").expect("separator pattern"));

static CORPORATE_SUFFIXES: Lazy<Regex> =
    Lazy::new(|| Regex::new("股份有限公司|有限公司|公司").expect("suffix pattern"));

/// Maps a string to its comparison key.
///
/// Navigation tokens are removed repeatedly so that removing one cannot splice
/// together a new one, which keeps the function idempotent.
pub fn normalize(s: &str) -> String {
    let mut key = PUNCTUATION.replace_all(s, "").into_owned();
    loop {
        let next = NAVIGATION_TOKENS.replace_all(&key, "").into_owned();
        if next == key {
            break;
        }
        key = next;
    }
    key.to_lowercase().trim().to_string()
}

fn strip_suffixes(s: &str) -> String {
    CORPORATE_SUFFIXES.replace_all(s, "").into_owned()
}

/// Containment either way, where a `candidate` inside `short` must cover more
/// than half of it. Keeps generic words like "台灣" from matching "台灣電力".
fn overlaps(candidate: &str, short: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    candidate.contains(short)
        || (short.contains(candidate) && candidate.chars().count() * 2 > short.chars().count())
}

/// Two-pass matcher. Returns the first result (in adapter order) that refers
/// to `company`, or `None`.
pub fn find_match<'a>(results: &'a [SearchResult], company: &str) -> Option<&'a SearchResult> {
    let query = normalize(company);

    if let Some(hit) = results.iter().find(|r| {
        let title = normalize(&r.title);
        // a title of only navigation words normalizes to "" and says nothing
        !title.is_empty() && (title == query || title.contains(&query) || query.contains(&title))
    }) {
        return Some(hit);
    }

    let short = strip_suffixes(&query);
    if short.chars().count() < 2 {
        return None;
    }

    results.iter().find(|r| {
        let title = strip_suffixes(&normalize(&r.title));
        if overlaps(&title, &short) {
            debug!(short_name = %short, title = %title, "matched after suffix stripping");
            return true;
        }
        // "Brand | English name" titles: compare each segment on its own
        TITLE_SEPARATORS
            .split(&r.title)
            .map(|segment| strip_suffixes(&normalize(segment)))
            .filter(|segment| segment.chars().count() >= 2)
            .any(|segment| {
                let hit = overlaps(&segment, &short);
                if hit {
                    debug!(short_name = %short, segment = %segment, "matched title segment");
                }
                hit
            })
    })
}

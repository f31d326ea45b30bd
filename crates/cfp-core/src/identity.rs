//! Canonical keys for event identity.
//!
//! Both the merge engine and the remote sync engine compare events through these
//! functions, so they must stay deterministic and idempotent.

/// Lowercase, collapse every run of non-alphanumeric characters into one hyphen and
/// strip hyphens from both ends. Absent or blank input yields an empty token.
pub fn normalize_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for c in text.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Canonical form of an event URL: `scheme://host/path`, lowercased, with query,
/// fragment and trailing slashes removed. Missing schemes default to `https`.
pub fn normalize_url(url: &str) -> String {
    let text = url.trim();
    if text.is_empty() {
        return String::new();
    }

    // a "://" after the first '/', '?' or '#' belongs to the path or query
    let separator = text
        .find("://")
        .filter(|idx| !text[..*idx].contains(['/', '?', '#']));
    let (scheme, rest) = match separator {
        Some(idx) => (&text[..idx], &text[idx + 3..]),
        None => ("", text.strip_prefix("//").unwrap_or(text)),
    };
    if !scheme.is_empty() && !is_valid_scheme(scheme) {
        return fallback_normalize(text);
    }
    let scheme = if scheme.is_empty() {
        "https".to_string()
    } else {
        scheme.to_ascii_lowercase()
    };

    let rest = strip_query_and_fragment(rest);
    let (host, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    format!(
        "{scheme}://{}{}",
        host.to_lowercase(),
        path.to_lowercase().trim_end_matches('/')
    )
}

/// External id for the local store: `source::url-token::event_start`.
///
/// `event_start` is part of the id because a promotional URL is occasionally reused
/// by two distinct editions of an event.
pub fn compute_external_id(source: &str, hyperlink: &str, event_start: &str) -> String {
    [
        normalize_component(source),
        normalize_component(&normalize_url(hyperlink)),
        event_start.to_string(),
    ]
    .join("::")
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn strip_query_and_fragment(text: &str) -> &str {
    match text.find(['?', '#']) {
        Some(idx) => &text[..idx],
        None => text,
    }
}

fn fallback_normalize(text: &str) -> String {
    strip_query_and_fragment(&text.to_lowercase())
        .trim_end_matches('/')
        .to_string()
}

//! Host-string normalization for online-source results
//!
//! Online sources hand back hostnames in every imaginable wrapping: URLs,
//! HTML table cells, certificate subject lists with wildcard labels,
//! `host:port` pairs. Everything funnels through [`normalize_host`], which
//! either produces a clean lowercase FQDN under the requested apex or
//! rejects the string. Normalization is idempotent: feeding its own output
//! back in returns the same value.

/// Normalizes one raw host string against an apex.
///
/// Steps, in order: decode HTML entities, drop tags, strip URL scheme and
/// path, strip a trailing port, trim surrounding punctuation, drop leading
/// wildcard labels, lowercase. The result must carry the apex as a
/// label-boundary suffix and pass [`valid_hostname`].
///
/// # Arguments
/// * `raw` - Host string as returned by a source
/// * `apex` - Apex domain the candidate must belong to
///
/// # Returns
/// * `Option<String>` - The normalized FQDN, or `None` when the string is
///   not a usable name under the apex
pub fn normalize_host(raw: &str, apex: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped = strip_tags(&decoded);
    let mut rest = stripped.trim();

    if let Some(idx) = rest.find("://") {
        rest = &rest[idx + 3..];
    }
    if let Some(idx) = rest.find(|c| c == '/' || c == '?' || c == '#') {
        rest = &rest[..idx];
    }
    if let Some(idx) = rest.rfind(':') {
        if rest[idx + 1..].bytes().all(|b| b.is_ascii_digit()) {
            rest = &rest[..idx];
        }
    }
    let rest = rest.trim_matches(|c: char| {
        c.is_whitespace()
            || matches!(
                c,
                '.' | ',' | ';' | ':' | '"' | '\'' | '(' | ')' | '[' | ']' | '<' | '>'
            )
    });
    let rest = rest.trim_start_matches(|c| c == '*' || c == '.');

    let host = rest.to_ascii_lowercase();
    let apex = apex.trim_end_matches('.').to_ascii_lowercase();
    if host != apex && !host.ends_with(&format!(".{}", apex)) {
        return None;
    }
    if !valid_hostname(&host) {
        return None;
    }
    Some(host)
}

/// Checks a lowercased host against the accepted grammar: two or more
/// labels of `[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?`, 253 characters total at
/// most, with a rightmost label of at least two alphabetic characters.
pub fn valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
    }
    if let Some(tld) = labels.last() {
        tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_alphabetic())
    } else {
        false
    }
}

/// Removes `<...>` spans, keeping the text between them.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

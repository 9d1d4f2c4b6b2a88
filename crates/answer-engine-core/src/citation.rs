//! Citation construction and domain enhancement.
//!
//! After a pipeline has settled its context list, each citation is given
//! a display domain, a favicon reference, and the number of *other*
//! citations in the same response that share that domain.

use std::collections::HashMap;

use crate::models::Citation;

const FAVICON_SERVICE: &str = "https://www.google.com/s2/favicons";

/// Extract the display domain from a URL.
///
/// Strips the scheme and a leading `www.`, then truncates at the first
/// path separator.
pub fn extract_domain(url: &str) -> String {
    let mut rest = url.trim();
    for scheme in ["https://", "http://"] {
        if let Some(stripped) = rest.strip_prefix(scheme) {
            rest = stripped;
            break;
        }
    }
    if let Some(stripped) = rest.strip_prefix("www.") {
        rest = stripped;
    }
    match rest.find('/') {
        Some(pos) => rest[..pos].to_string(),
        None => rest.to_string(),
    }
}

pub fn favicon_url(domain: &str) -> String {
    format!("{}?domain={}&sz=32", FAVICON_SERVICE, domain)
}

/// Fill in `domain`, `favicon` and `other_sources` for every citation.
pub fn enhance_citations(citations: &mut [Citation]) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for c in citations.iter_mut() {
        c.domain = extract_domain(&c.url);
        *counts.entry(c.domain.clone()).or_insert(0) += 1;
    }
    for c in citations.iter_mut() {
        c.favicon = favicon_url(&c.domain);
        c.other_sources = counts.get(&c.domain).copied().unwrap_or(1).saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://www.example.com/a/b"), "example.com");
        assert_eq!(extract_domain("http://docs.rs"), "docs.rs");
        assert_eq!(extract_domain("example.org/path"), "example.org");
        assert_eq!(extract_domain(""), "");
    }

    #[test]
    fn test_same_domain_counts() {
        let mut cites = vec![
            Citation::new(1, "https://a.com/x", "x", ""),
            Citation::new(2, "https://www.a.com/y", "y", ""),
            Citation::new(3, "https://b.com/", "z", ""),
        ];
        enhance_citations(&mut cites);
        let others: Vec<usize> = cites.iter().map(|c| c.other_sources).collect();
        assert_eq!(others, vec![1, 1, 0]);
        assert_eq!(cites[2].domain, "b.com");
        assert_eq!(
            cites[0].favicon,
            "https://www.google.com/s2/favicons?domain=a.com&sz=32"
        );
    }
}

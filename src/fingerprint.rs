//! # Fingerprint Module
//!
//! Deterministic, order-independent canonicalization of URLs into fixed-length
//! dedup keys.
//!
//! ## Overview
//!
//! Two URLs that point at the same resource frequently differ in irrelevant
//! ways: query-parameter order, tracking parameters appended by ad platforms,
//! doubled path separators. The fingerprint generator normalizes all of that
//! away before hashing, so the duplicate filter sees one key per semantic
//! target.
//!
//! ## Canonical form
//!
//! - scheme and host lowercased
//! - repeated path separators collapsed, leading separator guaranteed
//! - excluded (tracking) query parameters removed
//! - remaining query parameters sorted lexicographically by key
//!
//! The canonical string is hashed with SHA-256 and truncated to 16 hex
//! characters, prefixed with `fp:`. Unparsable URLs degrade to hashing the
//! raw input string; fingerprinting never fails.

use sha2::{Digest, Sha256};
use url::Url;

/// Tag prepended to every fingerprint.
const FINGERPRINT_PREFIX: &str = "fp:";

/// Number of hex characters kept from the digest.
const FINGERPRINT_LEN: usize = 16;

/// Query parameters stripped by default before fingerprinting. These are
/// tracking parameters that never change the identity of the target resource.
pub const DEFAULT_EXCLUDED_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "ref",
    "referrer",
    "source",
];

/// Generates a fingerprint for a URL using the default tracking-parameter
/// exclusion list.
pub fn generate(url: &str) -> String {
    generate_with_exclusions(url, DEFAULT_EXCLUDED_PARAMS)
}

/// Generates a fingerprint for a URL, stripping the given query parameters
/// before canonicalization.
pub fn generate_with_exclusions(url: &str, exclude_params: &[&str]) -> String {
    let canonical = canonicalize(url, exclude_params);
    format!("{}{}", FINGERPRINT_PREFIX, digest(&canonical))
}

/// Generates a fingerprint namespaced by spider name, so two crawls sharing
/// one backing store cannot collide on the same URL.
pub fn generate_for_spider(spider_name: &str, url: &str) -> String {
    let canonical = canonicalize(url, DEFAULT_EXCLUDED_PARAMS);
    format!("{}{}:{}", FINGERPRINT_PREFIX, spider_name, digest(&canonical))
}

/// Fingerprint for a request's dedup identity: (method, canonical URL),
/// namespaced by spider name.
pub fn generate_for_request(spider_name: &str, method: &str, url: &str) -> String {
    let canonical = format!("{} {}", method, canonicalize(url, DEFAULT_EXCLUDED_PARAMS));
    format!("{}{}:{}", FINGERPRINT_PREFIX, spider_name, digest(&canonical))
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..FINGERPRINT_LEN].to_string()
}

/// Reduces a URL to its canonical string form. Falls back to the raw input
/// when the URL does not parse.
fn canonicalize(url: &str, exclude_params: &[&str]) -> String {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return url.to_string(),
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let path = collapse_slashes(parsed.path());

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !exclude_params.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let port = match parsed.port() {
        Some(p) => format!(":{}", p),
        None => String::new(),
    };

    if query.is_empty() {
        format!("{}://{}{}{}", scheme, host, port, path)
    } else {
        format!("{}://{}{}{}?{}", scheme, host, port, path, query)
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len().max(1));
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn param_order_does_not_change_fingerprint() {
        let a = generate("https://example.com/page?a=1&b=2");
        let b = generate("https://example.com/page?b=2&a=1");
        assert_eq!(a, b);
    }

    #[test]
    fn tracking_params_are_stripped() {
        let plain = generate("https://example.com/page?id=7");
        let tracked = generate("https://example.com/page?id=7&utm_source=mail&fbclid=xyz");
        assert_eq!(plain, tracked);
    }

    #[test]
    fn scheme_and_host_case_insensitive() {
        assert_eq!(
            generate("HTTPS://Example.COM/page"),
            generate("https://example.com/page")
        );
    }

    #[test]
    fn path_slashes_collapse() {
        assert_eq!(
            generate("https://example.com//a///b"),
            generate("https://example.com/a/b")
        );
    }

    #[test]
    fn different_paths_differ() {
        assert_ne!(
            generate("https://example.com/a"),
            generate("https://example.com/b")
        );
    }

    #[test]
    fn unparsable_url_still_fingerprints() {
        let fp = generate("not a url at all");
        assert!(fp.starts_with("fp:"));
        assert_eq!(fp.len(), "fp:".len() + 16);
    }

    #[test]
    fn spider_namespace_isolates() {
        let url = "https://example.com/page";
        assert_ne!(
            generate_for_spider("alpha", url),
            generate_for_spider("beta", url)
        );
    }

    #[test]
    fn method_is_part_of_request_identity() {
        let url = "https://example.com/submit";
        assert_ne!(
            generate_for_request("s", "GET", url),
            generate_for_request("s", "POST", url)
        );
    }

    #[test]
    fn fixed_format() {
        let fp = generate("https://example.com/");
        assert!(fp.starts_with("fp:"));
        assert!(fp[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn shuffled_params_produce_identical_fingerprints(
            keys in proptest::collection::vec("[a-z]{1,8}", 1..6),
        ) {
            let pairs: Vec<String> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| format!("{}={}", k, i))
                .collect();
            let forward = format!("https://example.com/p?{}", pairs.join("&"));
            let mut reversed_pairs = pairs.clone();
            reversed_pairs.reverse();
            let reversed = format!("https://example.com/p?{}", reversed_pairs.join("&"));
            prop_assert_eq!(generate(&forward), generate(&reversed));
        }
    }
}

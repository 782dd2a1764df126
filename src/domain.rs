//! Domain extraction and counting.

use std::collections::HashMap;

use url::{Host, Url};

/// Extracts the registrable domain of a URL.
///
/// - `https://www.google.com/search` → `google.com`
/// - `https://news.bbc.co.uk/article` → `bbc.co.uk`
/// - `https://shop.example.com.au` → `example.com.au`
/// - `http://127.0.0.1:8080` → `127.0.0.1`
///
/// Returns `None` when the URL can't be parsed or carries no host.
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    match parsed.host()? {
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
        Host::Domain(hostname) => Some(registrable_part(&hostname.to_lowercase())),
    }
}

/// Domain used for the persisted row. Malformed URLs fall back to the raw string so a batch is
/// never aborted over one bad row.
pub fn domain_or_raw(url: &str) -> String {
    extract_domain(url).unwrap_or_else(|| url.to_string())
}

fn registrable_part(hostname: &str) -> String {
    if hostname == "localhost" {
        return hostname.into();
    }

    let parts: Vec<&str> = hostname.split('.').filter(|v| !v.is_empty()).collect();
    if parts.len() < 2 {
        return hostname.into();
    }

    // `.co.uk` / `.com.au` style suffixes keep one more label.
    let tld = parts[parts.len() - 1];
    let num_parts = if parts.len() >= 3 && tld.len() == 2 && matches!(parts[parts.len() - 2], "co" | "com") {
        3
    } else {
        2
    };

    parts[parts.len() - num_parts..].join(".")
}

/// Top `n` entries by weight, ties broken alphabetically.
pub fn top_domains(counts: HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut domains: Vec<(String, u64)> = counts.into_iter().collect();
    domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    domains.truncate(n);
    domains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain_subdomains() {
        assert_eq!(extract_domain("https://www.google.com/search?q=rust"), Some("google.com".into()));
        assert_eq!(extract_domain("https://docs.microsoft.com"), Some("microsoft.com".into()));
        assert_eq!(extract_domain("https://api.zinfandel.io"), Some("zinfandel.io".into()));
    }

    #[test]
    fn test_extract_domain_country_tlds() {
        assert_eq!(extract_domain("https://news.bbc.co.uk/news"), Some("bbc.co.uk".into()));
        assert_eq!(extract_domain("https://shop.example.com.au"), Some("example.com.au".into()));
    }

    #[test]
    fn test_extract_domain_special_cases() {
        assert_eq!(extract_domain("http://localhost:3000"), Some("localhost".into()));
        assert_eq!(extract_domain("http://127.0.0.1:8080"), Some("127.0.0.1".into()));
    }

    #[test]
    fn test_extract_domain_malformed() {
        assert_eq!(extract_domain(""), None);
        assert_eq!(extract_domain("not a url"), None);
        assert_eq!(extract_domain("file:///home/user/notes.txt"), None);
        assert_eq!(domain_or_raw("not a url"), "not a url");
    }

    #[test]
    fn test_top_domains_with_ties() {
        let counts = HashMap::from([
            ("google.com".to_string(), 5),
            ("github.com".to_string(), 5),
            ("reddit.com".to_string(), 9),
            ("bbc.co.uk".to_string(), 1),
        ]);

        let top = top_domains(counts, 3);

        assert_eq!(
            top,
            vec![
                ("reddit.com".to_string(), 9),
                ("github.com".to_string(), 5),
                ("google.com".to_string(), 5),
            ]
        );
    }
}

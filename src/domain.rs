use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

fn hostname_regex() -> &'static Regex {
    static HOSTNAME: OnceLock<Regex> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")
            .expect("hostname pattern is valid")
    })
}

/// Turns a raw input token into the domain used for the query and as the output file name.
///
/// URLs are reduced to their host. Anything else is kept as is, lowercased and
/// percent-encoded, so a malformed token ends up as one opaque path segment instead
/// of being rejected here.
pub fn normalize_domain(token: &str) -> String {
    let token = token.trim();

    let host = match Url::parse(token) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => token.to_string(),
        },
        Err(_) => token.to_string(),
    };

    let encoded = urlencoding::encode(&host.to_lowercase()).into_owned();

    // "." and ".." survive percent-encoding and would point outside the output directory
    if !encoded.is_empty() && encoded.chars().all(|c| c == '.') {
        return encoded.replace('.', "%2E");
    }
    encoded
}

/// Checks that `hostname` is a lowercase DNS name with at least two labels.
pub fn is_valid_hostname(hostname: &str) -> bool {
    hostname_regex().is_match(hostname)
}

/// Removes repeated values, keeping the first occurrence of each.
pub fn unique(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

/// Normalizes every token, drops empty ones and removes duplicates.
pub fn normalize_all<I, S>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let domains = tokens
        .into_iter()
        .filter(|token| !token.as_ref().trim().is_empty())
        .map(|token| normalize_domain(token.as_ref()))
        .collect();
    unique(domains)
}

//! Minimal URL and query-string helpers.
//!
//! The crate only ever touches URLs to read, scrub or append query
//! parameters on the host page's address, so a small hand-rolled parser is
//! carried instead of a full URL library. Percent-encoding goes through the
//! `urlencoding` crate; `+` is left untouched because the session code is
//! percent-encoded, not form-encoded.

/// Split a URL into (everything before `?`, raw query, raw fragment).
fn split(url: &str) -> (&str, &str, &str) {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((u, f)) => (u, f),
        None => (url, ""),
    };
    match without_fragment.split_once('?') {
        Some((base, query)) => (base, query, fragment),
        None => (without_fragment, "", fragment),
    }
}

fn rebuild(base: &str, query: &str, fragment: &str) -> String {
    let mut url = String::from(base);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    if !fragment.is_empty() {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Return the percent-decoded value of `name` in the URL's query, if present.
pub(crate) fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query, _) = split(url);
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == name {
            return Some(
                urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string()),
            );
        }
    }
    None
}

/// Remove the named query parameters, preserving the raw encoding of the
/// remaining pairs and the fragment.
pub(crate) fn strip_query_params(url: &str, names: &[&str]) -> String {
    let (base, query, fragment) = split(url);
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
            !pair.is_empty() && !names.contains(&key)
        })
        .collect();
    rebuild(base, &kept.join("&"), fragment)
}

/// Set (replace or append) a query parameter, percent-encoding the value.
pub(crate) fn set_query_param(url: &str, name: &str, value: &str) -> String {
    let encoded = format!("{name}={}", urlencoding::encode(value));
    let (base, query, fragment) = split(url);
    let mut pairs: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(str::to_string)
        .collect();
    let mut replaced = false;
    for pair in pairs.iter_mut() {
        let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
        if key == name {
            *pair = encoded.clone();
            replaced = true;
        }
    }
    if !replaced {
        pairs.push(encoded);
    }
    rebuild(base, &pairs.join("&"), fragment)
}

/// The host (including port) of a URL, as a browser's `location.host` reports it.
pub(crate) fn host_of(url: &str) -> &str {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_decodes_a_query_param() {
        let url = "https://example.com/app?zip=10013&code=aGk%3D";
        assert_eq!(query_param(url, "code").as_deref(), Some("aGk="));
        assert_eq!(query_param(url, "zip").as_deref(), Some("10013"));
        assert_eq!(query_param(url, "state"), None);
    }

    #[test]
    fn plus_signs_survive_decoding() {
        // base64 payloads carry '+' literally; only %XX escapes are decoded.
        let url = "https://example.com/?code=a+b";
        assert_eq!(query_param(url, "code").as_deref(), Some("a+b"));
    }

    #[test]
    fn strips_only_the_named_params() {
        let url = "https://example.com/app?zip=10013&code=abc&state=xyz#top";
        assert_eq!(
            strip_query_params(url, &["code", "state"]),
            "https://example.com/app?zip=10013#top"
        );
    }

    #[test]
    fn stripping_the_last_param_drops_the_question_mark() {
        assert_eq!(
            strip_query_params("https://example.com/app?code=abc", &["code"]),
            "https://example.com/app"
        );
    }

    #[test]
    fn sets_and_replaces_params() {
        assert_eq!(
            set_query_param("https://example.com/app", "code", "a="),
            "https://example.com/app?code=a%3D"
        );
        assert_eq!(
            set_query_param("https://example.com/app?code=old&x=1", "code", "new"),
            "https://example.com/app?code=new&x=1"
        );
    }

    #[test]
    fn host_includes_the_port() {
        assert_eq!(host_of("https://localhost:3000/app?x=1"), "localhost:3000");
        assert_eq!(host_of("https://example.com"), "example.com");
    }
}

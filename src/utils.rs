//! Utility functions

use std::time::Duration;

use crate::error::{Error, Result};

/// Append query parameters to a URL, preserving their order.
///
/// Parameters already present on the URL are kept; the new ones are appended
/// after them. The resulting string is used verbatim in the kickoff event, so
/// ordering matters for reproducibility.
pub fn append_query_params<'a, I>(base: &str, params: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut url = url::Url::parse(base).map_err(|e| Error::Config {
        message: format!("invalid URL {base}: {e}"),
        key: None,
    })?;

    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }

    // query_pairs_mut leaves a dangling "?" when nothing was appended
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url.to_string())
}

/// Parse a `retry-after` header into a delay, falling back to a default.
///
/// Only the delta-seconds form is supported; HTTP-date values fall back to
/// the default as well.
pub fn parse_retry_after(header: Option<&str>, default: Duration) -> Duration {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Response body text, substituting the HTTP reason phrase when empty.
///
/// Error events report *something* human-readable even for servers that send
/// bare status codes.
pub fn body_or_reason(body: String, status: reqwest::StatusCode) -> String {
    if body.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        body
    }
}

/// Empty strings become `None`; used for nullable event fields.
pub fn non_empty(body: String) -> Option<String> {
    if body.is_empty() { None } else { Some(body) }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_parameter_order() {
        let url = append_query_params(
            "http://x/Patient/$export",
            [("_since", "2020"), ("_type", "Patient")],
        )
        .unwrap();
        assert_eq!(url, "http://x/Patient/$export?_since=2020&_type=Patient");
    }

    #[test]
    fn append_with_no_params_leaves_url_untouched() {
        let url = append_query_params("http://x/Patient/$export", []).unwrap();
        assert_eq!(url, "http://x/Patient/$export");
    }

    #[test]
    fn append_encodes_values() {
        let url = append_query_params("http://x/$export", [("_type", "Patient,Observation")])
            .unwrap();
        assert_eq!(url, "http://x/$export?_type=Patient%2CObservation");
    }

    #[test]
    fn append_keeps_existing_query() {
        let url = append_query_params("http://x/$export?a=1", [("b", "2")]).unwrap();
        assert_eq!(url, "http://x/$export?a=1&b=2");
    }

    #[test]
    fn invalid_base_url_errors() {
        assert!(append_query_params("not a url", []).is_err());
    }

    #[test]
    fn retry_after_parses_seconds() {
        assert_eq!(
            parse_retry_after(Some("12"), Duration::from_secs(5)),
            Duration::from_secs(12)
        );
        assert_eq!(
            parse_retry_after(Some(" 3 "), Duration::from_secs(5)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn retry_after_falls_back_on_garbage_or_absence() {
        let default = Duration::from_secs(5);
        assert_eq!(parse_retry_after(None, default), default);
        assert_eq!(parse_retry_after(Some("soon"), default), default);
        // HTTP-date form is not supported, fall back rather than stall
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), default),
            default
        );
    }

    #[test]
    fn empty_body_becomes_reason_phrase() {
        assert_eq!(
            body_or_reason(String::new(), reqwest::StatusCode::NOT_FOUND),
            "Not Found"
        );
        assert_eq!(
            body_or_reason("detail".into(), reqwest::StatusCode::NOT_FOUND),
            "detail"
        );
    }

    #[test]
    fn non_empty_maps_empty_to_none() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("x".into()).as_deref(), Some("x"));
    }
}

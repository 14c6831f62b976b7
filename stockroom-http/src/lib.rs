#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

use http::header::{CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, ToStrError};
use stockroom_core::{CacheStatus, CacheStrategy, StrategyError, generate_cache_control_header};
use thiserror::Error;
use tracing::warn;

/// Header carrying the cache status of a response (`HIT`, `STALE` or `MISS`).
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("cache");

/// Error reading caching headers.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The header value is not visible ASCII.
    #[error("header is not valid text: {0}")]
    NotText(#[from] ToStrError),
    /// The header text is not a valid strategy.
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// Sets `cache-control` from `strategy`, replacing any previous value.
///
/// ```
/// use http::HeaderMap;
/// use stockroom_core::CacheStrategy;
///
/// let mut headers = HeaderMap::new();
/// stockroom_http::apply_strategy(&mut headers, &CacheStrategy::NONE);
/// assert_eq!(headers["cache-control"], "no-store");
/// ```
pub fn apply_strategy(headers: &mut HeaderMap, strategy: &CacheStrategy) {
    let header = generate_cache_control_header(strategy);
    match HeaderValue::from_str(&header) {
        Ok(value) => {
            headers.insert(CACHE_CONTROL, value);
        }
        Err(error) => warn!(%header, %error, "cache-control value rejected"),
    }
}

/// Sets the [`CACHE_STATUS_HEADER`] from `status`.
pub fn apply_status(headers: &mut HeaderMap, status: CacheStatus) {
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(status.as_header_value()),
    );
}

/// Reads the [`CACHE_STATUS_HEADER`], if present and recognised.
pub fn status_from_headers(headers: &HeaderMap) -> Option<CacheStatus> {
    match headers.get(CACHE_STATUS_HEADER)?.as_bytes() {
        b"HIT" => Some(CacheStatus::Hit),
        b"STALE" => Some(CacheStatus::Stale),
        b"MISS" => Some(CacheStatus::Miss),
        _ => None,
    }
}

/// Parses `cache-control` into a strategy.
///
/// Returns `Ok(None)` when the header is absent. Repeated headers are read
/// as one comma-separated list.
pub fn strategy_from_headers(headers: &HeaderMap) -> Result<Option<CacheStrategy>, HeaderError> {
    let mut values = headers.get_all(CACHE_CONTROL).iter().peekable();
    if values.peek().is_none() {
        return Ok(None);
    }
    let joined = values
        .map(HeaderValue::to_str)
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    Ok(Some(joined.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stockroom_core::CacheOptions;

    #[test]
    fn strategy_survives_a_header_round_trip() {
        let strategy = CacheStrategy::long_with(CacheOptions {
            stale_if_error: Some(60),
            ..Default::default()
        })
        .unwrap();

        let mut headers = HeaderMap::new();
        apply_strategy(&mut headers, &strategy);
        assert_eq!(
            headers[CACHE_CONTROL],
            "public, max-age=3600, stale-while-revalidate=82800, stale-if-error=60"
        );
        assert_eq!(strategy_from_headers(&headers).unwrap(), Some(strategy));
    }

    #[test]
    fn apply_strategy_replaces_previous_value() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("private"));
        apply_strategy(&mut headers, &CacheStrategy::SHORT);
        assert_eq!(headers.get_all(CACHE_CONTROL).iter().count(), 1);
        assert_eq!(
            headers[CACHE_CONTROL],
            "public, max-age=1, stale-while-revalidate=9"
        );
    }

    #[test]
    fn status_header_values() {
        let mut headers = HeaderMap::new();
        assert_eq!(status_from_headers(&headers), None);
        for status in [CacheStatus::Hit, CacheStatus::Stale, CacheStatus::Miss] {
            apply_status(&mut headers, status);
            assert_eq!(headers[CACHE_STATUS_HEADER], status.as_header_value());
            assert_eq!(status_from_headers(&headers), Some(status));
        }
    }

    #[test]
    fn repeated_headers_are_combined() {
        let mut headers = HeaderMap::new();
        headers.append(CACHE_CONTROL, HeaderValue::from_static("private"));
        headers.append(CACHE_CONTROL, HeaderValue::from_static("max-age=30, must-revalidate"));

        let strategy = strategy_from_headers(&headers).unwrap().unwrap();
        assert_eq!(strategy.to_string(), "private, max-age=30");
    }

    #[test]
    fn missing_and_invalid_headers() {
        let mut headers = HeaderMap::new();
        assert!(strategy_from_headers(&headers).unwrap().is_none());

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=-3"));
        assert!(matches!(
            strategy_from_headers(&headers),
            Err(HeaderError::Strategy(StrategyError::NegativeValue { .. }))
        ));
    }
}

// Metrics stream endpoint
//
// The dashboard is served from an http(s) origin; the stream lives on the same
// host under a fixed route, on ws for http and wss for https. The token rides
// along as a query parameter because browsers cannot set headers on upgrades.

use crate::streaming::types::{StreamError, StreamResult};
use reqwest::Url;

/// Route of the live metrics stream
pub const METRICS_STREAM_PATH: &str = "/api/ws/metrics";

/// Build the stream URL for `origin`, authenticated with `token`
pub fn stream_url(origin: &str, token: &str) -> StreamResult<String> {
    let mut url = Url::parse(origin.trim())
        .map_err(|e| StreamError::InvalidEndpoint(format!("{}: {}", origin, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(StreamError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| StreamError::InvalidEndpoint(format!("cannot use scheme {}", scheme)))?;

    url.set_path(METRICS_STREAM_PATH);
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair("token", token);

    Ok(url.into())
}

//! Small helpers for the HTTP-based notifiers.

use crate::error::NotifyError;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Joins `path` onto `base`, treating `base` as a directory.
///
/// `http://host/cgi-bin` and `http://host/cgi-bin/` both resolve
/// `message/send` to `http://host/cgi-bin/message/send`.
pub fn url_with_path(base: &str, path: &str) -> Result<Url, NotifyError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Appends query parameters to `url`.
pub fn url_with_parameters<'a>(
    mut url: Url,
    parameters: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Url {
    url.query_pairs_mut().extend_pairs(parameters);
    url
}

/// Sends `request` with `timeout` and returns the response body.
///
/// Any non-success status is reported as [`NotifyError::Status`] with the
/// body attached.
pub async fn send(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<String, NotifyError> {
    let response = request.timeout(timeout).send().await?;
    let status = response.status();
    let body = response.text().await?;
    debug!(status = %status, bytes = body.len(), "Received response");
    if !status.is_success() {
        return Err(NotifyError::Status { status, body });
    }
    Ok(body)
}

use hyper::ext::ReasonPhrase;
use reqwest::blocking::Response;
use reqwest::StatusCode;

/// What [`log_error_response`] saw on a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub status: StatusCode,
    /// The reason phrase the server sent, or the canonical one for the status.
    pub reason: Option<String>,
    pub body: Option<String>,
}

impl ErrorReport {
    pub fn status_line(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} {}", self.status.as_u16(), reason),
            None => self.status.as_u16().to_string(),
        }
    }
}

/// Log the status and body of `response` at debug level.
///
/// The response is consumed, which releases its connection back to the pool.
pub fn log_error_response(response: Response) -> Result<ErrorReport, reqwest::Error> {
    let status = response.status();
    let reason = reason_phrase(&response);
    tracing::debug!(
        status = status.as_u16(),
        reason = reason.as_deref().unwrap_or_default(),
        url = %response.url(),
        "HTTP error response"
    );

    let text = response.text()?;
    let body = if text.is_empty() {
        None
    } else {
        tracing::debug!(body = %text, "HTTP error response body");
        Some(text)
    };

    Ok(ErrorReport {
        status,
        reason,
        body,
    })
}

/// The HTTP/1 client only records a reason phrase when it differs from the
/// canonical one.
pub fn reason_phrase(response: &Response) -> Option<String> {
    response
        .extensions()
        .get::<ReasonPhrase>()
        .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
        .or_else(|| response.status().canonical_reason().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_includes_reason_when_known() {
        let report = ErrorReport {
            status: StatusCode::NOT_FOUND,
            reason: Some("Not Found".to_string()),
            body: None,
        };
        assert_eq!(report.status_line(), "404 Not Found");

        let unknown = ErrorReport {
            status: StatusCode::from_u16(599).unwrap(),
            reason: None,
            body: Some("boom".to_string()),
        };
        assert_eq!(unknown.status_line(), "599");
    }
}

//! HTTP utilities shared by the ARM client and the data-plane backends

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

pub(crate) const USER_AGENT: &str = concat!("tarm/", env!("CARGO_PKG_VERSION"));

/// A request that completed with a non-success status.
///
/// The body is kept so callers can still display whatever the service sent.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Request returned a non-success status code of {status} ({url})")]
pub struct ApiError {
    pub status: u16,
    pub url: String,
    pub body: String,
}

impl ApiError {
    /// Body of the failed response, if `error` carries an `ApiError`
    pub fn body_of(error: &anyhow::Error) -> Option<&str> {
        error.downcast_ref::<ApiError>().map(|e| e.body.as_str())
    }
}

/// Truncate a response body and strip non-printable characters for logging
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Read a response body, turning non-2xx statuses into [`ApiError`]
pub async fn read_response(response: Response) -> Result<String> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .context("Failed to read response body")?;

    if !status.is_success() {
        tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
        return Err(ApiError {
            status: status.as_u16(),
            url,
            body,
        }
        .into());
    }

    Ok(body)
}

/// Thin wrapper over a `reqwest::Client`
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Wrap a preconfigured client (e.g. one carrying an mTLS identity)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        tracing::debug!("{} {}", method, url);
        self.client.request(method, url)
    }

    /// Send a request and return the raw response, whatever its status
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.context("Failed to send request")
    }

    /// Send a request and return the body of a successful response
    pub async fn execute(&self, request: RequestBuilder) -> Result<String> {
        let response = self.send(request).await?;
        read_response(response).await
    }

    /// GET `url` with a bearer token
    pub async fn get(&self, url: &str, token: &str) -> Result<String> {
        self.execute(self.request(Method::GET, url).bearer_auth(token))
            .await
    }
}

/// Format an API error for display
pub fn format_api_error(error: &anyhow::Error) -> String {
    if let Some(api_error) = error.downcast_ref::<ApiError>() {
        let message = match api_error.status {
            400 => "Invalid request. Check your parameters.",
            401 => "Authentication failed. Run 'az login'.",
            403 => "Permission denied. Check your Azure role assignments.",
            404 => "Resource not found.",
            409 => "Resource conflict. The resource may already exist or be in use.",
            429 => "Rate limit exceeded. Please try again later.",
            500 | 502 | 503 => "Azure service temporarily unavailable. Please try again.",
            _ => "Request failed.",
        };
        return format!("{} (HTTP {})", message, api_error.status);
    }

    let error_str = format!("{:#}", error);
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

//! Transmission-provider client.
//!
//! The provider contract is a single HTTP POST with a bearer credential:
//! 2xx responses carry a provider message id, 429/5xx are retryable, all
//! other 4xx are permanent. The retry policy itself lives in the `Mailer`;
//! this module only issues one request per call and classifies the outcome.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ProviderError;

/// Request timeout for one provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One fully assembled outbound message.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Successful provider acknowledgement.
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    /// Provider-side message id from the 2xx response body
    pub message_id: String,
}

/// Trait for issuing one transmission attempt.
/// Abstracts the HTTP provider to enable scripted mocks in tests.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Issue a single outbound request. One call means one attempt; the
    /// caller owns retries.
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderReceipt, ProviderError>;
}

/// Wire payload of the provider's send endpoint.
#[derive(Serialize)]
struct SendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// 2xx response body.
#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

/// Machine-readable error body on non-2xx responses.
#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP transmission provider with API key bearer auth.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

/// Extract the provider's error message, falling back to the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.to_string(),
    }
}

#[async_trait]
impl MailProvider for HttpProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderReceipt, ProviderError> {
        let payload = SendPayload {
            from: &email.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if (200..300).contains(&status) {
            let message_id = match serde_json::from_str::<SendResponse>(&body) {
                Ok(parsed) => parsed.id,
                Err(_) => {
                    tracing::warn!(status, "provider 2xx response missing message id");
                    String::new()
                }
            };
            return Ok(ProviderReceipt { message_id });
        }

        let message = error_message(&body);
        if status == 429 || status >= 500 {
            Err(ProviderError::Retryable {
                status: Some(status),
                message,
            })
        } else {
            Err(ProviderError::Permanent { status, message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_parses_machine_readable_body() {
        assert_eq!(
            error_message(r#"{"message":"invalid recipient"}"#),
            "invalid recipient"
        );
        assert_eq!(error_message("upstream timeout"), "upstream timeout");
    }

    #[test]
    fn test_payload_shape() {
        let payload = SendPayload {
            from: "noreply@example.com",
            to: ["a@b.com"],
            subject: "Hi",
            html: "<p>x</p>",
            text: "x",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["to"], serde_json::json!(["a@b.com"]));
        assert_eq!(json["from"], "noreply@example.com");
    }
}

// Report delivery over HTTP: transactional email or a JSON webhook

use std::time::Duration;

use async_trait::async_trait;
use neofeed_core::content::truncate_chars;
use neofeed_core::telemetry::peer;
use neofeed_core::traits::NotificationSender;
use neofeed_core::{DeliveryError, NotificationChannel, RenderedReport};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{is_transient, EmailSettings};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct HttpNotifier {
    client: reqwest::Client,
    email: Option<EmailSettings>,
}

impl HttpNotifier {
    pub fn new(email: Option<EmailSettings>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, email })
    }

    fn email_request(
        &self,
        address: &str,
        report: &RenderedReport,
    ) -> Result<reqwest::RequestBuilder, DeliveryError> {
        let email = self
            .email
            .as_ref()
            .ok_or_else(|| DeliveryError::NotConfigured("email sender".to_string()))?;
        Ok(self
            .client
            .post(&email.api_url)
            .header("api-key", &email.api_key)
            .json(&json!({
                "sender": {"name": "NeoFeed", "email": email.sender},
                "to": [{"email": address}],
                "subject": report.subject,
                "htmlContent": report.html,
                "textContent": report.markdown,
            })))
    }

    fn webhook_request(&self, url: &str, user_id: Uuid, report: &RenderedReport) -> reqwest::RequestBuilder {
        self.client.post(url).json(&json!({
            "type": "weekly_report",
            "user_id": user_id,
            "subject": report.subject,
            "markdown": report.markdown,
            "html": report.html,
        }))
    }
}

#[async_trait]
impl NotificationSender for HttpNotifier {
    #[instrument(skip(self, channel, report), fields(peer.service = peer::NOTIFIER, channel = channel.kind()))]
    async fn deliver(
        &self,
        user_id: Uuid,
        channel: &NotificationChannel,
        report: &RenderedReport,
        idempotency_key: &str,
    ) -> Result<(), DeliveryError> {
        let request = match channel {
            NotificationChannel::Email { address } => self.email_request(address, report)?,
            NotificationChannel::Webhook { url } => self.webhook_request(url, user_id, report),
        };

        let response = request
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .send()
            .await
            .map_err(|e| {
                warn!(%user_id, error = %e, "delivery request failed");
                if is_transient(&e) {
                    DeliveryError::Unavailable(e.to_string())
                } else {
                    DeliveryError::Rejected(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(
                status.as_u16(),
                &truncate_chars(&body, 300),
            ));
        }

        info!(%user_id, channel = channel.kind(), "report delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report() -> RenderedReport {
        RenderedReport {
            subject: "Your NeoFeed week".to_string(),
            markdown: "# Report".to_string(),
            html: "<h1>Report</h1>".to_string(),
        }
    }

    fn notifier(server: &MockServer) -> HttpNotifier {
        HttpNotifier::new(
            Some(EmailSettings {
                api_url: format!("{}/v3/smtp/email", server.uri()),
                api_key: "brevo-key".to_string(),
                sender: "reports@neofeed.example".to_string(),
            }),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_email_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/smtp/email"))
            .and(header("api-key", "brevo-key"))
            .and(header(IDEMPOTENCY_HEADER, "run-1:deliver"))
            .and(body_partial_json(json!({
                "to": [{"email": "u1@example.com"}],
                "subject": "Your NeoFeed week",
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let channel = NotificationChannel::Email {
            address: "u1@example.com".to_string(),
        };
        notifier(&server)
            .deliver(Uuid::now_v7(), &channel, &report(), "run-1:deliver")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_delivery_and_classification() {
        let server = MockServer::start().await;
        Mock::given(path("/ok"))
            .and(body_partial_json(json!({"type": "weekly_report", "markdown": "# Report"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid"))
            .mount(&server)
            .await;
        Mock::given(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let n = notifier(&server);
        let hook = |p: &str| NotificationChannel::Webhook {
            url: format!("{}{p}", server.uri()),
        };
        let user_id = Uuid::now_v7();
        n.deliver(user_id, &hook("/ok"), &report(), "k").await.unwrap();
        assert!(matches!(
            n.deliver(user_id, &hook("/bad"), &report(), "k").await,
            Err(DeliveryError::Rejected(_))
        ));
        assert!(matches!(
            n.deliver(user_id, &hook("/down"), &report(), "k").await,
            Err(DeliveryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_email_without_settings_is_not_configured() {
        let n = HttpNotifier::new(None, Duration::from_secs(5)).unwrap();
        let channel = NotificationChannel::Email {
            address: "u1@example.com".to_string(),
        };
        assert!(matches!(
            n.deliver(Uuid::now_v7(), &channel, &report(), "k").await,
            Err(DeliveryError::NotConfigured(_))
        ));
    }
}

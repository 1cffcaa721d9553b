//! Telegram Bot API channel (`sendMessage`, plain text).

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::{format, Channel, DeliveryError, RunReport};
use crate::config::TelegramSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramChannel {
    settings: TelegramSettings,
}

impl TelegramChannel {
    pub fn new(settings: TelegramSettings) -> Self {
        Self { settings }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.api_key
        )
    }
}

#[async_trait::async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, report: &RunReport<'_>) -> Result<(), DeliveryError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let body = serde_json::json!({
            "chat_id": self.settings.chat_id,
            "text": format::chat_text(report),
        });

        let resp = client.post(self.endpoint()).json(&body).send().await?;
        let status = resp.status();
        // The Bot API answers errors with a JSON body too; prefer its
        // description over the bare status code.
        match resp.json::<ApiResponse>().await {
            Ok(api) if api.ok => Ok(()),
            Ok(api) => Err(DeliveryError::Rejected(
                api.description.unwrap_or_else(|| status.to_string()),
            )),
            Err(_) if status.is_success() => Ok(()),
            Err(_) => Err(DeliveryError::Rejected(status.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let channel = TelegramChannel::new(TelegramSettings {
            api_key: "123:abc".into(),
            chat_id: "42".into(),
            api_base: "http://127.0.0.1:9000/".into(),
        });
        assert_eq!(channel.endpoint(), "http://127.0.0.1:9000/bot123:abc/sendMessage");
    }
}

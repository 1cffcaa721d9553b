//! Completion notifications over independently configured channels.
//!
//! Each enabled channel gets exactly one delivery attempt per run. A
//! failing channel is logged and reported but never stops the others.

pub mod email;
pub mod format;
pub mod telegram;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::capture::Capture;
use crate::config::{AppConfig, ChannelSetting};
use crate::storage::RunId;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat API rejected the message: {0}")]
    Rejected(String),

    #[error("invalid email address {address:?}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },

    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to render report: {0}")]
    Render(#[from] askama::Error),
}

/// A finished run as seen by the notifier.
#[derive(Debug, Clone)]
pub struct RunReport<'a> {
    /// `None` when the run could not be written to the store.
    pub run_id: Option<RunId>,
    pub command: &'a str,
    pub shell: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: i32,
    pub stdout: &'a Capture,
    pub stderr: &'a Capture,
}

impl RunReport<'_> {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// A notification transport.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Short name used in logs and delivery reports.
    fn name(&self) -> &'static str;

    /// Make one delivery attempt.
    async fn send(&self, report: &RunReport<'_>) -> Result<(), DeliveryError>;
}

/// Outcome of one channel's delivery attempt.
#[derive(Debug)]
pub struct Delivery {
    pub channel: &'static str,
    pub result: Result<(), DeliveryError>,
}

/// Per-channel results of a [`Notifier::notify`] call.
#[derive(Debug, Default)]
pub struct NotifyReport {
    pub deliveries: Vec<Delivery>,
}

impl NotifyReport {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn delivered(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.deliveries
            .iter()
            .filter(|d| d.result.is_ok())
            .map(|d| d.channel)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&'static str, &DeliveryError)> + '_ {
        self.deliveries
            .iter()
            .filter_map(|d| d.result.as_ref().err().map(|e| (d.channel, e)))
    }
}

/// Fans a run report out to every enabled channel.
#[derive(Default)]
pub struct Notifier {
    channels: Vec<Box<dyn Channel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Box<dyn Channel>>) -> Self {
        Self { channels }
    }

    /// Build the channels enabled in `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        if let ChannelSetting::Enabled(settings) = &config.telegram {
            channels.push(Box::new(telegram::TelegramChannel::new(settings.clone())));
        }
        if let ChannelSetting::Enabled(settings) = &config.email {
            channels.push(Box::new(email::EmailChannel::new(settings.clone())));
        }
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send `report` on every channel, one attempt each, in order.
    pub async fn notify(&self, report: &RunReport<'_>) -> NotifyReport {
        let mut out = NotifyReport::default();
        for channel in &self.channels {
            let result = channel.send(report).await;
            match &result {
                Ok(()) => info!(channel = channel.name(), run_id = ?report.run_id, "Notification sent"),
                Err(e) => error!(
                    channel = channel.name(),
                    run_id = ?report.run_id,
                    error = %e,
                    "Notification delivery failed"
                ),
            }
            out.deliveries.push(Delivery {
                channel: channel.name(),
                result,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        fail: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Channel for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, report: &RunReport<'_>) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(format!("{}:{}", self.name, report.command));
            if self.fail {
                Err(DeliveryError::Rejected("nope".into()))
            } else {
                Ok(())
            }
        }
    }

    fn sample<'a>(out: &'a Capture) -> RunReport<'a> {
        let now = Utc::now();
        RunReport {
            run_id: Some(RunId(1)),
            command: "true",
            shell: "/bin/sh",
            started_at: now,
            finished_at: now,
            exit_code: 0,
            stdout: out,
            stderr: out,
        }
    }

    #[tokio::test]
    async fn test_no_channels_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::from_config(&AppConfig::with_base_dir(dir.path()));
        assert_eq!(notifier.channel_count(), 0);

        let out = Capture::default();
        let report = notifier.notify(&sample(&out)).await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new(vec![
            Box::new(Recording { name: "first", fail: true, seen: seen.clone() }),
            Box::new(Recording { name: "second", fail: false, seen: seen.clone() }),
        ]);

        let out = Capture::default();
        let report = notifier.notify(&sample(&out)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["first:true", "second:true"]);
        assert_eq!(report.delivered().collect::<Vec<_>>(), vec!["second"]);
        let failed: Vec<_> = report.failed().map(|(name, _)| name).collect();
        assert_eq!(failed, vec!["first"]);
    }
}

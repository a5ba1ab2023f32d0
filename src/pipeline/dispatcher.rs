//! Notification dispatcher - delivers alerts with a primary channel and
//! an independent fallback.
//!
//! The durable dedup record is written only after a delivery succeeded,
//! so a crash between the dedup check and the send cannot leave a false
//! "notified" row. Both channels failing drops the alert: token
//! freshness decays too fast for open-ended redelivery.

use crate::config::{TelegramConfig, WebhookConfig};
use crate::error::WatchError;
use crate::pipeline::dedup::DedupGuard;
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::{NotificationRecord, TokenAlert, TokenCandidate};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A delivery transport for structured alerts.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, alert: &TokenAlert) -> Result<(), WatchError>;
}

#[derive(Serialize)]
struct InlineKeyboardButton {
    text: String,
    url: String,
}

#[derive(Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Serialize)]
struct TelegramMessageWithKeyboard {
    chat_id: String,
    text: String,
    parse_mode: String,
    reply_markup: InlineKeyboardMarkup,
}

/// Primary channel: rich HTML message through the Telegram bot API.
pub struct TelegramChannel {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    fn format_message(alert: &TokenAlert) -> String {
        let mut text = format!(
            "🚨 <b>New token matched '{}'</b>\n\n\
             <b>Name:</b> {}\n",
            alert.matched_keyword, alert.name
        );
        if let Some(symbol) = &alert.symbol {
            text.push_str(&format!("<b>Symbol:</b> {}\n", symbol));
        }
        text.push_str(&format!(
            "<b>Mint:</b> <code>{}</code>\n<b>Age:</b> {}s\n",
            alert.address, alert.age_secs
        ));
        if let Some(price) = alert.price_usd {
            text.push_str(&format!("<b>Price:</b> ${:.8}\n", price));
        }
        if let Some(market_cap) = alert.market_cap_usd {
            text.push_str(&format!("<b>Market cap:</b> ${:.0}\n", market_cap));
        }
        text
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, alert: &TokenAlert) -> Result<(), WatchError> {
        let keyboard = vec![vec![
            InlineKeyboardButton {
                text: "Solscan".to_string(),
                url: format!("https://solscan.io/token/{}", alert.address),
            },
            InlineKeyboardButton {
                text: "Birdeye".to_string(),
                url: format!("https://birdeye.so/token/{}", alert.address),
            },
        ]];

        let message = TelegramMessageWithKeyboard {
            chat_id: self.chat_id.clone(),
            text: Self::format_message(alert),
            parse_mode: "HTML".to_string(),
            reply_markup: InlineKeyboardMarkup {
                inline_keyboard: keyboard,
            },
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| WatchError::delivery("telegram", e))?;

        if !response.status().is_success() {
            return Err(WatchError::delivery(
                "telegram",
                format!("sendMessage returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Fallback channel: plain POST with a simplified embed payload.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, alert: &TokenAlert) -> Result<(), WatchError> {
        let payload = json!({
            "content": format!(
                "New token matched '{}': {} ({})",
                alert.matched_keyword,
                alert.name,
                alert.symbol.as_deref().unwrap_or("?")
            ),
            "embeds": [{
                "title": alert.name,
                "description": format!(
                    "Mint `{}` matched keyword `{}` at {}s old",
                    alert.address, alert.matched_keyword, alert.age_secs
                ),
            }],
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WatchError::delivery("webhook", e))?;

        if !response.status().is_success() {
            return Err(WatchError::delivery(
                "webhook",
                format!("webhook returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Drives the dedup check, the primary/fallback delivery policy and the
/// post-delivery durable record.
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    guard: Arc<DedupGuard>,
    metrics: Arc<PipelineMetrics>,
}

impl NotificationDispatcher {
    /// `channels` is ordered: primary first, fallback after. Each channel
    /// gets exactly one delivery attempt per alert.
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        guard: Arc<DedupGuard>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            channels,
            guard,
            metrics,
        }
    }

    /// Deliver an alert for a matched candidate. Returns true if a
    /// notification went out.
    pub async fn dispatch(&self, candidate: &TokenCandidate, matched_keyword: &str) -> bool {
        let address = candidate.mint.to_string();

        if !self.guard.should_notify(&address).await {
            self.metrics.record_dedup_rejection();
            debug!("Dedup guard suppressed notification for {}", address);
            return false;
        }

        let now = chrono::Utc::now().timestamp();
        let alert = TokenAlert {
            name: candidate.display_name(),
            symbol: candidate.symbol.clone(),
            address: address.clone(),
            age_secs: candidate.age_secs(now).max(0),
            matched_keyword: matched_keyword.to_string(),
            price_usd: None,
            market_cap_usd: None,
        };

        let mut delivered_via = None;
        for channel in &self.channels {
            match channel.send(&alert).await {
                Ok(()) => {
                    delivered_via = Some(channel.name());
                    break;
                }
                Err(e) => {
                    warn!("Delivery via {} failed for {}: {}", channel.name(), address, e);
                }
            }
        }

        match delivered_via {
            Some(channel_name) => {
                self.guard
                    .record(&NotificationRecord {
                        address: address.clone(),
                        token_name: alert.name.clone(),
                        notification_type: format!("keyword:{}", matched_keyword),
                        notified_at: now,
                    })
                    .await;
                self.metrics.record_notification_sent();
                info!(
                    "Notified '{}' ({}) via {} for keyword '{}'",
                    alert.name, address, channel_name, matched_keyword
                );
                true
            }
            None => {
                self.metrics.record_notification_failed();
                error!(
                    "All notification channels failed for {}; alert dropped",
                    address
                );
                false
            }
        }
    }
}

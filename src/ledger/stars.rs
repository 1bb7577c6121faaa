// Refunds through the chat platform's star-payment endpoint.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::traits::{Ledger, RefundRequest};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct RefundBody<'a> {
    user_id: i64,
    telegram_payment_charge_id: &'a str,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct StarsLedger {
    client: Client,
    api_base: String,
    token: String,
}

impl StarsLedger {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Reads `TELEGRAM_BOT_TOKEN` and, optionally, `TELEGRAM_API_URL`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN is not set"))?;
        let api_base = std::env::var("TELEGRAM_API_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(api_base, token)
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/refundStarPayment", self.api_base, self.token)
    }
}

#[async_trait]
impl Ledger for StarsLedger {
    async fn compensate(&self, refund: &RefundRequest) -> Result<()> {
        info!(
            "refunding {} to user {} (charge {}): {}",
            refund.amount, refund.payer, refund.charge_reference, refund.reason
        );
        if refund.payer == 0 {
            warn!(
                "refund for charge {} sent without a known payer",
                refund.charge_reference
            );
        }

        let resp = self
            .client
            .post(self.endpoint())
            .json(&RefundBody {
                user_id: refund.payer,
                telegram_payment_charge_id: &refund.charge_reference,
            })
            .send()
            .await
            .context("refund request failed")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("refund rejected: HTTP {}: {}", status.as_u16(), body));
        }
        let reply: ApiReply = serde_json::from_str(&body)
            .with_context(|| format!("unexpected refund reply: {}", body))?;
        if !reply.ok {
            return Err(anyhow!(
                "refund rejected: {}",
                reply.description.unwrap_or_else(|| "no description".to_string())
            ));
        }
        Ok(())
    }
}

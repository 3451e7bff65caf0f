//! SEP-10 / SEP-24 anchor client
//!
//! Auth: GET challenge, co-sign it with the auth key, POST it back for a JWT.
//! Flows: interactive withdraw/deposit sessions, polled by transaction id.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::read_json;
use super::stellar::{self, Keypair};
use super::{
    AdapterError, DepositSession, FiatRail, RailStatus, RailTransaction, WithdrawSession,
};
use crate::config::RailConfig;

#[derive(Deserialize)]
struct ChallengeResponse {
    transaction: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct InteractiveResponse {
    id: String,
    url: String,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    withdraw_anchor_account: Option<String>,
}

#[derive(Deserialize)]
struct TransactionEnvelope {
    transaction: WireTransaction,
}

/// SEP-24 transaction object; amounts arrive as strings
#[derive(Deserialize)]
struct WireTransaction {
    id: String,
    status: String,
    #[serde(default)]
    amount_in: Option<String>,
    #[serde(default)]
    amount_out: Option<String>,
    #[serde(default)]
    amount_fee: Option<String>,
    #[serde(default)]
    withdraw_anchor_account: Option<String>,
    #[serde(default)]
    withdraw_memo: Option<String>,
    #[serde(default)]
    external_transaction_id: Option<String>,
}

fn parse_amount(field: &str, value: Option<String>) -> Result<Option<Decimal>, AdapterError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Decimal::from_str(raw)
            .map(Some)
            .map_err(|e| AdapterError::Decode(format!("{} '{}': {}", field, raw, e))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<WireTransaction> for RailTransaction {
    type Error = AdapterError;

    fn try_from(wire: WireTransaction) -> Result<Self, Self::Error> {
        Ok(Self {
            status: RailStatus::from_wire(&wire.status),
            amount_in: parse_amount("amount_in", wire.amount_in)?,
            amount_out: parse_amount("amount_out", wire.amount_out)?,
            amount_fee: parse_amount("amount_fee", wire.amount_fee)?,
            destination: non_empty(wire.withdraw_anchor_account),
            memo: non_empty(wire.withdraw_memo),
            reference_id: non_empty(wire.external_transaction_id),
            session_id: wire.id,
        })
    }
}

/// Interactive URLs are opened in a popup that reports back via postMessage
fn with_postmessage_callback(url: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}callback=postmessage", url, separator)
}

pub struct Sep24Anchor {
    config: RailConfig,
    client: reqwest::Client,
    auth_key: Keypair,
    /// Account that sends/receives settlement funds
    funds_account: String,
}

impl Sep24Anchor {
    pub fn new(config: &RailConfig) -> Result<Self, AdapterError> {
        let auth_secret = config
            .auth_secret
            .as_deref()
            .ok_or_else(|| AdapterError::Config("rail.auth_secret is required".to_string()))?;
        let funds_secret = config
            .funds_secret
            .as_deref()
            .ok_or_else(|| AdapterError::Config("rail.funds_secret is required".to_string()))?;
        let auth_key = Keypair::from_secret(auth_secret)?;
        let funds_account = Keypair::from_secret(funds_secret)?.account_id();

        info!(
            "Initializing SEP-24 anchor at {} (auth {})",
            config.sep24_url,
            auth_key.account_id()
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AdapterError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            client,
            auth_key,
            funds_account,
        })
    }

    async fn open_interactive(
        &self,
        token: &str,
        kind: &str,
        amount: Decimal,
    ) -> Result<InteractiveResponse, AdapterError> {
        let response = self
            .client
            .post(format!(
                "{}/transactions/{}/interactive",
                self.config.sep24_url, kind
            ))
            .bearer_auth(token)
            .json(&json!({
                "asset_code": self.config.asset_code,
                "account": self.funds_account,
                "amount": amount.to_string(),
                "lang": "en",
            }))
            .send()
            .await?;
        let opened: InteractiveResponse = read_json(response).await?;
        info!(session_id = %opened.id, kind, "SEP-24 session opened");
        Ok(opened)
    }
}

#[async_trait]
impl FiatRail for Sep24Anchor {
    fn name(&self) -> &'static str {
        "sep24-anchor"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn authenticate(&self, correlation_id: &str) -> Result<String, AdapterError> {
        let account = self.auth_key.account_id();
        let mut request = self
            .client
            .get(&self.config.auth_url)
            .query(&[("account", account.as_str())]);
        // SEP-10 memos must be numeric ids
        if correlation_id.parse::<u64>().is_ok() {
            request = request.query(&[("memo", correlation_id)]);
        }
        let challenge: ChallengeResponse = read_json(request.send().await?).await?;

        let signed = stellar::sign_challenge(
            &challenge.transaction,
            &self.config.network_passphrase,
            &self.auth_key,
        )?;

        let response = self
            .client
            .post(&self.config.auth_url)
            .json(&json!({ "transaction": signed }))
            .send()
            .await?;
        let token: TokenResponse = read_json(response).await?;
        debug!(correlation_id, "SEP-10 auth successful");
        Ok(token.token)
    }

    async fn open_withdraw(
        &self,
        token: &str,
        amount: Decimal,
    ) -> Result<WithdrawSession, AdapterError> {
        let opened = self.open_interactive(token, "withdraw", amount).await?;
        Ok(WithdrawSession {
            url: with_postmessage_callback(&opened.url),
            memo: non_empty(opened.memo),
            destination: non_empty(opened.withdraw_anchor_account),
            session_id: opened.id,
        })
    }

    async fn open_deposit(
        &self,
        token: &str,
        amount: Decimal,
    ) -> Result<DepositSession, AdapterError> {
        let opened = self.open_interactive(token, "deposit", amount).await?;
        Ok(DepositSession {
            url: with_postmessage_callback(&opened.url),
            session_id: opened.id,
        })
    }

    async fn poll_status(
        &self,
        token: &str,
        session_id: &str,
    ) -> Result<RailTransaction, AdapterError> {
        let response = self
            .client
            .get(format!("{}/transaction", self.config.sep24_url))
            .query(&[("id", session_id)])
            .bearer_auth(token)
            .send()
            .await?;
        let envelope: TransactionEnvelope = read_json(response).await?;
        let tx = RailTransaction::try_from(envelope.transaction)?;
        if let RailStatus::Unknown(status) = &tx.status {
            warn!(session_id, status, "Unrecognized SEP-24 status");
        }
        Ok(tx)
    }
}

//! Allbridge Core REST client

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use super::error::read_json;
use super::{AdapterError, Bridge, BridgeDirection, BridgeQuote, BridgeReceipt};
use crate::config::BridgeConfig;

/// Used when the API omits an ETA or the quote call fails
const DEFAULT_ETA_SECS: u64 = 300;
/// 0.3%
const FALLBACK_FEE_PERCENT: Decimal = Decimal::from_parts(3, 0, 0, false, 1);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    source_chain: &'a str,
    destination_chain: &'a str,
    source_token: &'a str,
    destination_token: &'a str,
    amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_address: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    transfer_id: String,
    #[serde(default)]
    source_chain_tx_id: Option<String>,
    #[serde(default)]
    estimated_time: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimateResponse {
    #[serde(default)]
    fee: Option<Value>,
    #[serde(default)]
    estimated_time: Option<u64>,
}

/// Fee may arrive as a JSON number or a decimal string
fn decimal_field(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn fallback_quote(amount: Decimal) -> BridgeQuote {
    BridgeQuote {
        fee: (amount * FALLBACK_FEE_PERCENT / Decimal::ONE_HUNDRED).round_dp(2),
        fee_percent: FALLBACK_FEE_PERCENT,
        eta_secs: DEFAULT_ETA_SECS,
    }
}

pub struct AllbridgeClient {
    config: BridgeConfig,
    client: reqwest::Client,
}

impl AllbridgeClient {
    pub fn new(config: &BridgeConfig) -> Result<Self, AdapterError> {
        info!("Initializing Allbridge client at {}", config.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AdapterError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    fn chains(&self, direction: BridgeDirection) -> (&str, &str) {
        match direction {
            BridgeDirection::Forward => (&self.config.custody_chain, &self.config.settlement_chain),
            BridgeDirection::Back => (&self.config.settlement_chain, &self.config.custody_chain),
        }
    }

    async fn transfer(
        &self,
        direction: BridgeDirection,
        amount: Decimal,
        destination: Option<&str>,
    ) -> Result<BridgeReceipt, AdapterError> {
        let (source_chain, destination_chain) = self.chains(direction);
        let request = TransferRequest {
            source_chain,
            destination_chain,
            source_token: &self.config.token,
            destination_token: &self.config.token,
            amount: amount.to_string(),
            destination_address: destination,
        };
        let response = self
            .client
            .post(format!("{}/v1/bridge/transfer", self.config.base_url))
            .json(&request)
            .send()
            .await?;
        let data: TransferResponse = read_json(response).await?;
        info!(
            transfer_id = %data.transfer_id,
            "Allbridge {}->{} transfer initiated",
            source_chain, destination_chain
        );
        Ok(BridgeReceipt {
            operation_id: data.transfer_id,
            source_tx: data.source_chain_tx_id.unwrap_or_default(),
            eta_secs: data.estimated_time.unwrap_or(DEFAULT_ETA_SECS),
        })
    }

    async fn fetch_quote(
        &self,
        amount: Decimal,
        direction: BridgeDirection,
    ) -> Result<BridgeQuote, AdapterError> {
        let (source_chain, destination_chain) = self.chains(direction);
        let amount_str = amount.to_string();
        let response = self
            .client
            .get(format!("{}/v1/bridge/estimate", self.config.base_url))
            .query(&[
                ("sourceChain", source_chain),
                ("destinationChain", destination_chain),
                ("sourceToken", self.config.token.as_str()),
                ("destinationToken", self.config.token.as_str()),
                ("amount", amount_str.as_str()),
            ])
            .send()
            .await?;
        let data: EstimateResponse = read_json(response).await?;
        let fee = data
            .fee
            .as_ref()
            .and_then(decimal_field)
            .unwrap_or(Decimal::ZERO);
        Ok(BridgeQuote {
            fee_percent: (fee / amount * Decimal::ONE_HUNDRED).round_dp(4),
            fee,
            eta_secs: data.estimated_time.unwrap_or(DEFAULT_ETA_SECS),
        })
    }
}

#[async_trait]
impl Bridge for AllbridgeClient {
    fn name(&self) -> &'static str {
        "allbridge"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn bridge_forward(&self, amount: Decimal) -> Result<BridgeReceipt, AdapterError> {
        self.transfer(BridgeDirection::Forward, amount, None).await
    }

    async fn bridge_back(
        &self,
        amount: Decimal,
        destination: &str,
    ) -> Result<BridgeReceipt, AdapterError> {
        self.transfer(BridgeDirection::Back, amount, Some(destination))
            .await
    }

    /// Advisory only: falls back to 0.3% / 300s when the estimate is unavailable
    async fn quote_fee(
        &self,
        amount: Decimal,
        direction: BridgeDirection,
    ) -> Result<BridgeQuote, AdapterError> {
        if amount <= Decimal::ZERO {
            return Err(AdapterError::Rejected(format!("invalid amount {}", amount)));
        }
        match self.fetch_quote(amount, direction).await {
            Ok(quote) => Ok(quote),
            Err(e) => {
                warn!("Allbridge estimate unavailable, using fallback: {}", e);
                Ok(fallback_quote(amount))
            }
        }
    }
}

//! Horizon payment submission

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::error::read_json;
use super::stellar::{self, Keypair, Memo, PaymentParams};
use super::{AdapterError, Settlement};
use crate::config::SettlementConfig;

#[derive(Deserialize)]
struct AccountResponse {
    sequence: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    hash: String,
}

pub struct HorizonSettlement {
    config: SettlementConfig,
    client: reqwest::Client,
    source: Keypair,
    asset_issuer: [u8; 32],
}

impl HorizonSettlement {
    pub fn new(config: &SettlementConfig) -> Result<Self, AdapterError> {
        let secret = config.funds_secret.as_deref().ok_or_else(|| {
            AdapterError::Config("settlement.funds_secret is required".to_string())
        })?;
        let source = Keypair::from_secret(secret)?;
        let asset_issuer = stellar::decode_account_id(&config.asset_issuer)?;

        info!(
            "Initializing Horizon settlement at {} (source {})",
            config.horizon_url,
            source.account_id()
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AdapterError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            client,
            source,
            asset_issuer,
        })
    }

    async fn load_sequence(&self) -> Result<i64, AdapterError> {
        let response = self
            .client
            .get(format!(
                "{}/accounts/{}",
                self.config.horizon_url,
                self.source.account_id()
            ))
            .send()
            .await?;
        let account: AccountResponse = read_json(response).await?;
        account
            .sequence
            .parse::<i64>()
            .map_err(|e| AdapterError::Decode(format!("bad sequence '{}': {}", account.sequence, e)))
    }
}

#[async_trait]
impl Settlement for HorizonSettlement {
    fn name(&self) -> &'static str {
        "horizon"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn pay(
        &self,
        destination: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<String, AdapterError> {
        // Validate everything before touching the network
        let destination_key = stellar::decode_account_id(destination)
            .map_err(|_| AdapterError::Rejected(format!("invalid destination {}", destination)))?;
        let amount_stroops = stellar::to_stroops(amount)?;
        let memo = Memo::parse(memo)?;

        let sequence = self.load_sequence().await?;
        let max_time = Utc::now().timestamp().max(0) as u64 + self.config.tx_timeout_secs;
        let params = PaymentParams {
            source: &self.source,
            sequence: sequence + 1,
            fee: self.config.base_fee,
            max_time,
            destination: destination_key,
            asset_code: &self.config.asset_code,
            asset_issuer: self.asset_issuer,
            amount_stroops,
            memo,
        };
        let envelope = stellar::build_payment_envelope(&params, &self.config.network_passphrase)?;

        let response = self
            .client
            .post(format!("{}/transactions", self.config.horizon_url))
            .form(&[("tx", envelope.as_str())])
            .send()
            .await?;
        let submitted: SubmitResponse = read_json(response).await?;
        info!(tx_hash = %submitted.hash, %amount, destination, "Settlement payment submitted");
        Ok(submitted.hash)
    }
}

//! Provider gateway client: access-token exchange and the push-payment
//! (STK) request. A thin transport wrapper; the trait is the seam the rest
//! of the pipeline depends on, so tests and the ops tool can substitute a
//! stub without touching the network.

use crate::{
    config::GatewayConfig,
    error::{SaccoError, SaccoResult},
    store::PaymentRequestRow,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider acceptance of a push instruction.
#[derive(Debug, Clone)]
pub struct PushAccepted {
    pub correlation_id: String,
    pub merchant_request_id: Option<String>,
}

/// Contract of the push side of the provider. Implementations must return
/// the provider-issued correlation id on acceptance and a `Gateway` error
/// carrying the provider's message on any rejection.
pub trait PushGateway {
    fn initiate_push(&self, request: &PaymentRequestRow) -> SaccoResult<PushAccepted>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PushRequestBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: f64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: String,
}

#[derive(Deserialize)]
struct PushResponseBody {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Daraja-style production gateway over blocking HTTP.
pub struct DarajaGateway {
    config: GatewayConfig,
    http: reqwest::blocking::Client,
}

impl DarajaGateway {
    pub fn new(config: GatewayConfig) -> SaccoResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SaccoError::Gateway(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    fn access_token(&self) -> SaccoResult<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url()
        );
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .map_err(|e| SaccoError::Gateway(format!("token exchange: {e}")))?;
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(SaccoError::Gateway(format!("token exchange refused: {body}")));
        }
        let token: TokenResponse = resp
            .json()
            .map_err(|e| SaccoError::Gateway(format!("token response: {e}")))?;
        Ok(token.access_token)
    }

    /// `base64(shortcode + passkey + timestamp)` per the provider contract.
    fn derive_password(&self, timestamp: &str) -> String {
        let raw = format!("{}{}{timestamp}", self.config.shortcode, self.config.passkey);
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    fn compact_timestamp() -> String {
        chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
    }
}

impl PushGateway for DarajaGateway {
    fn initiate_push(&self, request: &PaymentRequestRow) -> SaccoResult<PushAccepted> {
        let token = self.access_token()?;
        let timestamp = Self::compact_timestamp();
        let body = PushRequestBody {
            business_short_code: &self.config.shortcode,
            password: self.derive_password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: request.amount,
            party_a: &request.phone,
            party_b: &self.config.shortcode,
            phone_number: &request.phone,
            callback_url: &self.config.callback_url,
            account_reference: &request.id,
            transaction_desc: format!("SACCO payment {}", request.payment_for),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url());
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .map_err(|e| SaccoError::Gateway(format!("push request: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(SaccoError::Gateway(format!("push refused: {body}")));
        }
        let parsed: PushResponseBody = resp
            .json()
            .map_err(|e| SaccoError::Gateway(format!("push response: {e}")))?;
        match parsed.checkout_request_id {
            Some(correlation_id) => Ok(PushAccepted {
                correlation_id,
                merchant_request_id: parsed.merchant_request_id,
            }),
            None => Err(SaccoError::Gateway(
                parsed
                    .error_message
                    .unwrap_or_else(|| "provider returned no CheckoutRequestID".into()),
            )),
        }
    }
}

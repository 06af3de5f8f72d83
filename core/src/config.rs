//! Runtime configuration: provider gateway credentials and the fixed
//! allocation amounts the rule engine works with.

use crate::{error::SaccoResult, store::SaccoStore};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEnvironment {
    Sandbox,
    Production,
}

/// Credentials and endpoints for the mobile-money provider. Loaded from the
/// environment; never persisted.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: GatewayEnvironment,
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let consumer_key = env::var("MPESA_CONSUMER_KEY")
            .map_err(|_| anyhow::anyhow!("MPESA_CONSUMER_KEY not set"))?;
        let consumer_secret = env::var("MPESA_CONSUMER_SECRET")
            .map_err(|_| anyhow::anyhow!("MPESA_CONSUMER_SECRET not set"))?;
        let shortcode = env::var("MPESA_SHORTCODE")
            .map_err(|_| anyhow::anyhow!("MPESA_SHORTCODE not set"))?;
        let passkey = env::var("MPESA_PASSKEY")
            .map_err(|_| anyhow::anyhow!("MPESA_PASSKEY not set"))?;
        let callback_url = env::var("MPESA_CALLBACK_URL")
            .map_err(|_| anyhow::anyhow!("MPESA_CALLBACK_URL not set"))?;
        let environment = match env::var("MPESA_ENVIRONMENT").as_deref() {
            Ok("production") => GatewayEnvironment::Production,
            _ => GatewayEnvironment::Sandbox,
        };
        Ok(Self {
            consumer_key,
            consumer_secret,
            shortcode,
            passkey,
            callback_url,
            environment,
        })
    }

    pub fn base_url(&self) -> &'static str {
        match self.environment {
            GatewayEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            GatewayEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

/// Fixed amounts driving rule-based allocation and the fines sweep.
///
/// Defaults match the cooperative's registration fee, daily savings amount,
/// shares target and welfare contribution; each can be overridden through the
/// `settings` relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub membership_fee: f64,
    pub daily_deposit_amount: f64,
    pub shares_target: f64,
    pub welfare_amount: f64,
    pub savings_fine_amount: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            membership_fee: 1000.0,
            daily_deposit_amount: 100.0,
            shares_target: 12_000.0,
            welfare_amount: 200.0,
            savings_fine_amount: 50.0,
        }
    }
}

impl AllocationConfig {
    /// Resolve from the settings relation, falling back to defaults for any
    /// key that is absent or unparseable.
    pub fn load(store: &SaccoStore) -> SaccoResult<Self> {
        let mut cfg = Self::default();
        let read = |store: &SaccoStore, key: &str, slot: &mut f64| -> SaccoResult<()> {
            if let Some(raw) = store.get_setting(key)? {
                match raw.parse::<f64>() {
                    Ok(v) => *slot = v,
                    Err(_) => log::warn!("settings: ignoring non-numeric value for {key}: {raw}"),
                }
            }
            Ok(())
        };
        read(store, "membership_fee", &mut cfg.membership_fee)?;
        read(store, "daily_deposit_amount", &mut cfg.daily_deposit_amount)?;
        read(store, "shares_target", &mut cfg.shares_target)?;
        read(store, "welfare_amount", &mut cfg.welfare_amount)?;
        read(store, "savings_fine_amount", &mut cfg.savings_fine_amount)?;
        Ok(cfg)
    }

    /// Config with the compiled-in amounts, for use in tests.
    pub fn default_test() -> Self {
        Self::default()
    }
}

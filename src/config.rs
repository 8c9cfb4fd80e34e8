// 7.0 config.rs: all settings in one place. market presets, fees, engine tuning.
// 7.1 MarketParams is what create_market takes. ClearinghouseConfig bundles a whole deployment.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::engine::EngineConfig;
use crate::funding::FundingParams;
use crate::liquidation::LiquidationParams;
use crate::margin::maintenance_below_initial;
use crate::types::{Bps, FeedId, Leverage, MarketId, OwnerId, BPS_DENOMINATOR};

// Everything needed to list one perpetual market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    pub id: MarketId,
    // Market symbol (e.g. "SOL-PERP")
    pub symbol: String,
    // Base asset (what you're trading)
    pub base_asset: String,
    // Quote asset (what you're settling in)
    pub quote_asset: String,
    // Oracle feed the index price comes from
    pub oracle_feed: FeedId,
    pub max_leverage: Leverage,
    pub maintenance_margin_bps: Bps,
    pub funding: FundingParams,
    pub liquidation: LiquidationParams,
    // Custody pool name
    pub collateral_vault: String,
}

impl MarketParams {
    pub fn sol_perp() -> Self {
        Self {
            id: MarketId(1),
            symbol: "SOL-PERP".to_string(),
            base_asset: "SOL".to_string(),
            quote_asset: "USDC".to_string(),
            oracle_feed: FeedId(1),
            max_leverage: Leverage::new_unchecked(10),
            maintenance_margin_bps: Bps::new(500), // 5%
            funding: FundingParams::default(),
            liquidation: LiquidationParams::default(),
            collateral_vault: "sol-perp-vault".to_string(),
        }
    }

    pub fn btc_perp() -> Self {
        Self {
            id: MarketId(2),
            symbol: "BTC-PERP".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDC".to_string(),
            oracle_feed: FeedId(2),
            max_leverage: Leverage::new_unchecked(20),
            maintenance_margin_bps: Bps::new(250), // 2.5%
            funding: FundingParams {
                max_funding_rate_bps: Bps::new(75),
                funding_interval_secs: 3600,
            },
            liquidation: LiquidationParams {
                liquidation_fee_bps: Bps::new(100),
                insurance_penalty_bps: Bps::new(100),
            },
            collateral_vault: "btc-perp-vault".to_string(),
        }
    }

    pub fn with_id(mut self, id: MarketId, oracle_feed: FeedId) -> Self {
        self.id = id;
        self.oracle_feed = oracle_feed;
        self
    }

    // Validate the market for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::InvalidMarket {
                reason: "Symbol must not be empty".to_string(),
            });
        }

        // serde can hand us a zero leverage even though Leverage::new rejects it
        if self.max_leverage.value() == 0 {
            return Err(ConfigError::InvalidMarket {
                reason: "Max leverage must be at least 1x".to_string(),
            });
        }

        let mm = self.maintenance_margin_bps.value() as i128;
        if mm == 0 || mm >= BPS_DENOMINATOR {
            return Err(ConfigError::InvalidMargin {
                reason: "Maintenance margin must be between 0 and 100%".to_string(),
            });
        }

        // MM must sit below IM at max leverage or a fresh position opens liquidatable
        if !maintenance_below_initial(self.maintenance_margin_bps, self.max_leverage) {
            return Err(ConfigError::InvalidMargin {
                reason: format!(
                    "Maintenance margin {} bps is not below initial margin at {}",
                    mm, self.max_leverage
                ),
            });
        }

        if self.funding.funding_interval_secs <= 0 {
            return Err(ConfigError::InvalidFunding {
                reason: "Funding interval must be positive".to_string(),
            });
        }

        if self.funding.max_funding_rate_bps.value() as i128 > BPS_DENOMINATOR {
            return Err(ConfigError::InvalidFunding {
                reason: "Funding clamp above 100% per interval".to_string(),
            });
        }

        let liq_total = self.liquidation.liquidation_fee_bps.value() as i128
            + self.liquidation.insurance_penalty_bps.value() as i128;
        if liq_total > BPS_DENOMINATOR {
            return Err(ConfigError::InvalidFees {
                reason: "Liquidation fee plus penalty above 100%".to_string(),
            });
        }

        Ok(())
    }
}

// A whole deployment: who administers it, what it charges, what it lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearinghouseConfig {
    pub admin: OwnerId,
    // Trading fee in basis points, charged on opened notional
    pub trading_fee_bps: Bps,
    #[serde(default)]
    pub engine: EngineConfig,
    pub markets: Vec<MarketParams>,
}

impl Default for ClearinghouseConfig {
    fn default() -> Self {
        Self {
            admin: OwnerId(0),
            trading_fee_bps: Bps::new(0),
            engine: EngineConfig::default(),
            markets: vec![MarketParams::sol_perp()],
        }
    }
}

impl ClearinghouseConfig {
    // Preset for testnet: both markets, tiny fee
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.trading_fee_bps = Bps::new(1);
        config.markets.push(MarketParams::btc_perp());
        config
    }

    // Preset for mainnet with conservative settings
    pub fn mainnet_conservative() -> Self {
        let mut config = Self::testnet();
        config.trading_fee_bps = Bps::new(5); // 0.05%
        config.engine.max_oracle_age_secs = Some(60);
        for market in &mut config.markets {
            market.max_leverage = Leverage::new_unchecked(5);
        }
        config
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading_fee_bps.value() > 100 {
            return Err(ConfigError::InvalidFees {
                reason: "Trading fee too high (>1%)".to_string(),
            });
        }

        if self.engine.max_commit_retries == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "Need at least one commit attempt".to_string(),
            });
        }

        if matches!(self.engine.max_oracle_age_secs, Some(age) if age <= 0) {
            return Err(ConfigError::InvalidEngine {
                reason: "Oracle age limit must be positive".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for market in &self.markets {
            market.validate()?;
            if !seen.insert(market.id) {
                return Err(ConfigError::InvalidMarket {
                    reason: format!("Duplicate market id {}", market.id),
                });
            }
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid margin config: {reason}")]
    InvalidMargin { reason: String },

    #[error("Invalid market config: {reason}")]
    InvalidMarket { reason: String },

    #[error("Invalid funding config: {reason}")]
    InvalidFunding { reason: String },

    #[error("Invalid fee config: {reason}")]
    InvalidFees { reason: String },

    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },

    #[error("Config parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> ClearinghouseConfig {
        match self {
            Environment::Development => ClearinghouseConfig::default(),
            Environment::Testnet => ClearinghouseConfig::testnet(),
            Environment::Mainnet => ClearinghouseConfig::mainnet_conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_valid() {
        assert!(MarketParams::sol_perp().validate().is_ok());
        assert!(MarketParams::btc_perp().validate().is_ok());
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());

        let mainnet = Environment::Mainnet.config();
        assert!(mainnet.validate().is_ok());
        assert_eq!(mainnet.engine.max_oracle_age_secs, Some(60));
        assert_eq!(mainnet.markets.len(), 2);
    }

    #[test]
    fn test_maintenance_above_initial_rejected() {
        let mut params = MarketParams::sol_perp();
        // 5% MM at 20x means 5% IM, a fresh position is already at the edge
        params.max_leverage = Leverage::new(20).unwrap();

        let result = params.validate();
        assert!(matches!(result, Err(ConfigError::InvalidMargin { .. })));
    }

    #[test]
    fn test_zero_funding_interval_rejected() {
        let mut params = MarketParams::sol_perp();
        params.funding.funding_interval_secs = 0;
        assert!(matches!(params.validate(), Err(ConfigError::InvalidFunding { .. })));
    }

    #[test]
    fn test_liquidation_split_bounded() {
        let mut params = MarketParams::sol_perp();
        params.liquidation.liquidation_fee_bps = Bps::new(6_000);
        params.liquidation.insurance_penalty_bps = Bps::new(5_000);
        assert!(matches!(params.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_duplicate_market_ids() {
        let mut config = ClearinghouseConfig::default();
        config.markets.push(MarketParams::btc_perp().with_id(MarketId(1), FeedId(9)));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMarket { .. })));
    }

    #[test]
    fn test_fee_cap() {
        let mut config = ClearinghouseConfig::default();
        config.trading_fee_bps = Bps::new(101);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = ClearinghouseConfig::testnet();
        let json = config.to_json().unwrap();
        let back = ClearinghouseConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_engine_section_optional() {
        let json = r#"{
            "admin": 1,
            "trading_fee_bps": 2,
            "markets": []
        }"#;
        let config = ClearinghouseConfig::from_json(json).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.admin, OwnerId(1));
    }

    #[test]
    fn test_bad_json() {
        let result = ClearinghouseConfig::from_json("{ not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}

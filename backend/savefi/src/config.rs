//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Result, SaveFiError};
use crate::primitives::Address;

#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint of the wallet provider holding `account`
    pub rpc_url: String,
    /// Expected chain id; checked at startup when set (Sepolia is 11155111)
    pub chain_id: Option<u64>,
    /// The connected account that signs every transaction
    pub account: Address,
    /// ERC-20 token the plan is denominated in (USDC)
    pub token_address: Address,
    /// The savings contract
    pub savings_address: Address,
    /// Plan index passed to deposit/withdraw calls
    pub plan_id: u128,
    pub token_decimals: u32,
    /// Decimals of the reward token accrued by the plan
    pub reward_decimals: u32,
    /// Delay between receipt polls while awaiting confirmation
    pub confirmation_poll: Duration,
    /// Base URL of the indexing API (MultiBaas deployment)
    pub indexer_url: String,
    pub indexer_api_key: String,
    pub indexer_chain: String,
    /// Address alias and contract label the savings contract is registered under
    pub savings_alias: String,
    pub savings_label: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    /// Optional prompt overrides
    pub advisor_prompt_path: Option<PathBuf>,
    pub extraction_prompt_path: Option<PathBuf>,
    /// Block explorer used for transaction links
    pub explorer_url: String,
    /// Port for the REST API server
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SaveFiError::Config(format!("{key} environment variable is required")))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        Ok(Config {
            rpc_url: or_default("RPC_URL", "http://127.0.0.1:8545"),
            chain_id: lookup("CHAIN_ID")
                .map(|v| parse_var("CHAIN_ID", &v))
                .transpose()?,
            account: address_var("ACCOUNT_ADDRESS", &required("ACCOUNT_ADDRESS")?)?,
            token_address: address_var("TOKEN_ADDRESS", &required("TOKEN_ADDRESS")?)?,
            savings_address: address_var("SAVINGS_ADDRESS", &required("SAVINGS_ADDRESS")?)?,
            plan_id: parse_var("PLAN_ID", &or_default("PLAN_ID", "0"))?,
            token_decimals: parse_var("TOKEN_DECIMALS", &or_default("TOKEN_DECIMALS", "6"))?,
            reward_decimals: parse_var("REWARD_DECIMALS", &or_default("REWARD_DECIMALS", "18"))?,
            confirmation_poll: Duration::from_millis(parse_var(
                "CONFIRMATION_POLL_MS",
                &or_default("CONFIRMATION_POLL_MS", "2000"),
            )?),
            indexer_url: required("INDEXER_URL")?,
            indexer_api_key: required("INDEXER_API_KEY")?,
            indexer_chain: or_default("INDEXER_CHAIN", "ethereum"),
            savings_alias: or_default("SAVINGS_ALIAS", "savefi5"),
            savings_label: or_default("SAVINGS_LABEL", "savefi"),
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: or_default("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: or_default("OPENAI_MODEL", "gpt-4o-mini"),
            advisor_prompt_path: lookup("ADVISOR_PROMPT_PATH").map(PathBuf::from),
            extraction_prompt_path: lookup("EXTRACTION_PROMPT_PATH").map(PathBuf::from),
            explorer_url: or_default("EXPLORER_URL", "https://sepolia.etherscan.io"),
            api_port: parse_var("API_PORT", &or_default("API_PORT", "3001"))?,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SaveFiError::Config(format!("Invalid {key}: {value}")))
}

fn address_var(key: &str, value: &str) -> Result<Address> {
    Address::parse(value).map_err(|e| SaveFiError::Config(format!("Invalid {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("ACCOUNT_ADDRESS", format!("0x{}", "1".repeat(40))),
            ("TOKEN_ADDRESS", format!("0x{}", "2".repeat(40))),
            ("SAVINGS_ADDRESS", format!("0x{}", "3".repeat(40))),
            ("INDEXER_URL", "https://multibaas.example".to_string()),
            ("INDEXER_API_KEY", "mb-key".to_string()),
            ("OPENAI_API_KEY", "sk-test".to_string()),
        ])
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let env = base_env();
        let config = Config::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.chain_id, None);
        assert_eq!(config.token_decimals, 6);
        assert_eq!(config.reward_decimals, 18);
        assert_eq!(config.plan_id, 0);
        assert_eq!(config.confirmation_poll, Duration::from_millis(2000));
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.savings_alias, "savefi5");
        assert_eq!(config.api_port, 3001);
        assert!(config.advisor_prompt_path.is_none());
    }

    #[test]
    fn missing_required_key_is_config_error() {
        let mut env = base_env();
        env.remove("SAVINGS_ADDRESS");
        let err = Config::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, SaveFiError::Config(ref m) if m.contains("SAVINGS_ADDRESS")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut env = base_env();
        env.insert("API_PORT", "not-a-port".to_string());
        assert!(Config::from_lookup(|k| env.get(k).cloned()).is_err());

        let mut env = base_env();
        env.insert("TOKEN_ADDRESS", "0x1234".to_string());
        assert!(Config::from_lookup(|k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn explicit_chain_id_is_parsed() {
        let mut env = base_env();
        env.insert("CHAIN_ID", "11155111".to_string());
        let config = Config::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.chain_id, Some(11_155_111));
    }
}

use crate::datasource::RpcTargets;
use crate::domain::pool::MAX_TOKEN_DECIMALS;
use crate::domain::PoolId;
use crate::engine::SelectorConfig;
use alloy_primitives::Address;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Deployed pool state view used when `STATE_VIEW_ADDRESS` is not set.
pub const DEFAULT_STATE_VIEW_ADDRESS: &str = "0x9D467FA9062b6e9B1a46E26007aD82db116c67cB";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rpc_url: String,
    pub pool_id: PoolId,
    pub state_view_address: Address,
    pub nav_source_address: Address,
    pub executor_address: Address,
    pub vault_address: Address,
    pub token0_address: Address,
    pub token1_address: Address,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
    pub trigger_bps: u32,
    pub slippage_pct: u32,
    pub deadline_margin_secs: u64,
    pub redemption_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub state_read_max_elapsed_ms: u64,
    pub tick_spacing: i32,
    pub liquidity_window_steps: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let rpc_url = required(&env_map, "RPC_URL")?;

        let pool_id = PoolId::parse(&required(&env_map, "POOL_ID")?).map_err(|_| {
            ConfigError::InvalidValue("POOL_ID".to_string(), "must be 32-byte hex".to_string())
        })?;

        let state_view_address = address(
            "STATE_VIEW_ADDRESS",
            env_map
                .get("STATE_VIEW_ADDRESS")
                .map(|s| s.as_str())
                .unwrap_or(DEFAULT_STATE_VIEW_ADDRESS),
        )?;
        let nav_source_address = required_address(&env_map, "NAV_SOURCE_ADDRESS")?;
        let executor_address = required_address(&env_map, "EXECUTOR_ADDRESS")?;
        let vault_address = required_address(&env_map, "VAULT_ADDRESS")?;
        let token0_address = required_address(&env_map, "TOKEN0_ADDRESS")?;
        let token1_address = required_address(&env_map, "TOKEN1_ADDRESS")?;

        let token0_decimals = decimals(&env_map, "TOKEN0_DECIMALS")?;
        let token1_decimals = decimals(&env_map, "TOKEN1_DECIMALS")?;

        let trigger_bps = parse_or(&env_map, "ARB_TRIGGER_BPS", 500u32, "must be a valid u32")?;
        let slippage_pct = parse_or(&env_map, "SLIPPAGE_PCT", 1u32, "must be a valid u32")?;
        if slippage_pct >= 100 {
            return Err(ConfigError::InvalidValue(
                "SLIPPAGE_PCT".to_string(),
                format!("must be below 100, got {}", slippage_pct),
            ));
        }
        let deadline_margin_secs =
            parse_or(&env_map, "DEADLINE_MARGIN_SECS", 3000u64, "must be a valid u64")?;
        let redemption_delay_secs =
            parse_or(&env_map, "REDEMPTION_DELAY_SECS", 0u64, "must be a valid u64")?;
        let poll_interval_ms = parse_or(&env_map, "POLL_INTERVAL_MS", 2000u64, "must be a valid u64")?;
        let state_read_max_elapsed_ms = parse_or(
            &env_map,
            "STATE_READ_MAX_ELAPSED_MS",
            30_000u64,
            "must be a valid u64",
        )?;

        let tick_spacing = parse_or(&env_map, "TICK_SPACING", 60i32, "must be a valid i32")?;
        if tick_spacing <= 0 {
            return Err(ConfigError::InvalidValue(
                "TICK_SPACING".to_string(),
                "must be positive".to_string(),
            ));
        }
        let liquidity_window_steps =
            parse_or(&env_map, "LIQUIDITY_WINDOW_STEPS", 20u32, "must be a valid u32")?;

        Ok(Config {
            port,
            database_path,
            rpc_url,
            pool_id,
            state_view_address,
            nav_source_address,
            executor_address,
            vault_address,
            token0_address,
            token1_address,
            token0_decimals,
            token1_decimals,
            trigger_bps,
            slippage_pct,
            deadline_margin_secs,
            redemption_delay_secs,
            poll_interval_ms,
            state_read_max_elapsed_ms,
            tick_spacing,
            liquidity_window_steps,
        })
    }

    pub fn selector(&self) -> SelectorConfig {
        SelectorConfig {
            trigger_bps: self.trigger_bps,
            slippage_pct: self.slippage_pct,
            deadline_margin_secs: self.deadline_margin_secs,
        }
    }

    pub fn rpc_targets(&self) -> RpcTargets {
        RpcTargets {
            pool_id: self.pool_id.clone(),
            state_view: self.state_view_address,
            nav_source: self.nav_source_address,
            vault: self.vault_address,
            executor: self.executor_address,
            token0: self.token0_address,
            token1: self.token1_address,
        }
    }

    pub fn redemption_delay(&self) -> Duration {
        Duration::from_secs(self.redemption_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn state_read_max_elapsed(&self) -> Duration {
        Duration::from_millis(self.state_read_max_elapsed_ms)
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
        None => Ok(default),
    }
}

fn address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim()).map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), "must be a 20-byte hex address".to_string())
    })
}

fn required_address(env_map: &HashMap<String, String>, key: &str) -> Result<Address, ConfigError> {
    address(key, &required(env_map, key)?)
}

fn decimals(env_map: &HashMap<String, String>, key: &str) -> Result<u8, ConfigError> {
    let value = parse_or(env_map, key, 6u8, "must be a valid u8")?;
    if value > MAX_TOKEN_DECIMALS {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be at most {}", MAX_TOKEN_DECIMALS),
        ));
    }
    Ok(value)
}

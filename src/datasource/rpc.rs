//! State reader over Ethereum JSON-RPC.

use super::{DataSourceError, StateReader};
use crate::domain::{ChainTime, PoolId, PoolState, TargetPrice, TickLiquidity, TimeMs};
use alloy_primitives::aliases::I24;
use alloy_primitives::{Address, Uint, B256, U256};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use futures::future::try_join_all;
use num_bigint::BigUint;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

sol! {
    interface IStateView {
        function getSlot0(bytes32 poolId) external view returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee);
        function getLiquidity(bytes32 poolId) external view returns (uint128 liquidity);
        function getTickLiquidity(bytes32 poolId, int24 tick) external view returns (uint128 liquidityGross, int128 liquidityNet);
    }

    interface INavSource {
        function nav1e18() external view returns (uint256);
    }

    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }

    interface IVault {
        function convertToShares(uint256 assets) external view returns (uint256 shares);
    }
}

/// Contracts the reader talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTargets {
    pub pool_id: PoolId,
    /// Pool state view (`getSlot0`, `getLiquidity`, `getTickLiquidity`).
    pub state_view: Address,
    /// Contract exposing `nav1e18()`.
    pub nav_source: Address,
    /// Vault minting shares for token1 (`convertToShares`).
    pub vault: Address,
    /// Holder whose balances are valued in the ledger.
    pub executor: Address,
    pub token0: Address,
    pub token1: Address,
}

/// Reads pool, vault and balance state with `eth_call`.
#[derive(Debug, Clone)]
pub struct RpcStateReader {
    client: Client,
    rpc_url: String,
    targets: RpcTargets,
    token0_decimals: u8,
    token1_decimals: u8,
}

impl RpcStateReader {
    pub fn new(rpc_url: String, targets: RpcTargets, token0_decimals: u8, token1_decimals: u8) -> Self {
        Self {
            client: Client::new(),
            rpc_url,
            targets,
            token0_decimals,
            token1_decimals,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, DataSourceError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(DataSourceError::RateLimited);
        }
        if status.is_server_error() {
            return Err(DataSourceError::HttpError {
                status: status.as_u16(),
                message: "Server error".to_string(),
            });
        }
        if !status.is_success() {
            return Err(DataSourceError::HttpError {
                status: status.as_u16(),
                message: "Client error".to_string(),
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| DataSourceError::ParseError(e.to_string()))?;
        extract_result(body)
    }

    async fn eth_call(&self, to: &Address, data: Vec<u8>) -> Result<Vec<u8>, DataSourceError> {
        let params = json!([
            { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let result = self.rpc("eth_call", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| DataSourceError::ParseError("eth_call result is not a string".to_string()))?;
        decode_hex(raw)
    }

    async fn call<C>(&self, to: &Address, call: C) -> Result<C::Return, DataSourceError>
    where
        C: SolCall + Send + Sync,
    {
        let output = self.eth_call(to, call.abi_encode()).await?;
        C::abi_decode_returns(&output, true)
            .map_err(|e| DataSourceError::ParseError(format!("{}: {}", C::SIGNATURE, e)))
    }

    fn pool_key(&self) -> Result<B256, DataSourceError> {
        pool_key(&self.targets.pool_id)
    }
}

#[async_trait]
impl StateReader for RpcStateReader {
    async fn read_pool_state(&self) -> Result<PoolState, DataSourceError> {
        let pool_id = self.pool_key()?;
        let state_view = &self.targets.state_view;
        let slot0 = self.call(state_view, IStateView::getSlot0Call { poolId: pool_id }).await?;
        let liquidity = self
            .call(state_view, IStateView::getLiquidityCall { poolId: pool_id })
            .await?
            .liquidity;

        let sqrt_price_x96 = to_biguint(slot0.sqrtPriceX96);
        let tick = from_int24(slot0.tick)?;
        debug!(%sqrt_price_x96, tick, active_liquidity = liquidity, "Read pool state");

        PoolState::new(
            liquidity,
            sqrt_price_x96,
            tick,
            self.token0_decimals,
            self.token1_decimals,
            TimeMs::now(),
        )
        .map_err(|e| DataSourceError::ParseError(e.to_string()))
    }

    async fn read_reference_price(&self) -> Result<TargetPrice, DataSourceError> {
        let nav = self.call(&self.targets.nav_source, INavSource::nav1e18Call {}).await?;
        Ok(TargetPrice::new(to_biguint(nav._0)))
    }

    async fn read_balances(&self) -> Result<(BigUint, BigUint), DataSourceError> {
        let account = self.targets.executor;
        let b0 = self
            .call(&self.targets.token0, IERC20::balanceOfCall { account })
            .await?;
        let b1 = self
            .call(&self.targets.token1, IERC20::balanceOfCall { account })
            .await?;
        Ok((to_biguint(b0._0), to_biguint(b1._0)))
    }

    async fn read_tick_liquidity(&self, ticks: &[i32]) -> Result<Vec<TickLiquidity>, DataSourceError> {
        let pool_id = self.pool_key()?;
        let reads = ticks.iter().map(|tick| async move {
            let call = IStateView::getTickLiquidityCall {
                poolId: pool_id,
                tick: to_int24(*tick)?,
            };
            let out = self.call(&self.targets.state_view, call).await?;
            Ok::<_, DataSourceError>(TickLiquidity {
                tick: *tick,
                liquidity_gross: out.liquidityGross,
                liquidity_net: out.liquidityNet,
            })
        });
        try_join_all(reads).await
    }

    async fn preview_mint(&self, assets: &BigUint) -> Result<BigUint, DataSourceError> {
        let call = IVault::convertToSharesCall {
            assets: to_u256(assets)?,
        };
        let out = self.call(&self.targets.vault, call).await?;
        Ok(to_biguint(out.shares))
    }

    async fn chain_time(&self) -> Result<ChainTime, DataSourceError> {
        let block = self.rpc("eth_getBlockByNumber", json!(["latest", false])).await?;
        let timestamp = block
            .get("timestamp")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DataSourceError::ParseError("block has no timestamp".to_string()))?;
        parse_hex_u64(timestamp).map(ChainTime::new)
    }

    async fn block_number(&self) -> Result<u64, DataSourceError> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| DataSourceError::ParseError("block number is not a string".to_string()))?;
        parse_hex_u64(raw)
    }
}

fn extract_result(body: Value) -> Result<Value, DataSourceError> {
    if let Some(err) = body.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(DataSourceError::Rejected(message));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| DataSourceError::ParseError("response has no result".to_string()))
}

fn pool_key(pool_id: &PoolId) -> Result<B256, DataSourceError> {
    pool_id
        .as_str()
        .parse::<B256>()
        .map_err(|e| DataSourceError::ParseError(format!("pool id {}: {}", pool_id, e)))
}

fn to_biguint<const BITS: usize, const LIMBS: usize>(value: Uint<BITS, LIMBS>) -> BigUint {
    BigUint::from_bytes_be(&value.to_be_bytes_vec())
}

fn to_u256(value: &BigUint) -> Result<U256, DataSourceError> {
    U256::try_from_be_slice(&value.to_bytes_be())
        .ok_or_else(|| DataSourceError::ParseError(format!("{} overflows uint256", value)))
}

fn to_int24(tick: i32) -> Result<I24, DataSourceError> {
    I24::try_from(tick).map_err(|e| DataSourceError::ParseError(format!("tick {}: {}", tick, e)))
}

fn from_int24(tick: I24) -> Result<i32, DataSourceError> {
    i32::try_from(tick).map_err(|e| DataSourceError::ParseError(format!("tick {}: {}", tick, e)))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, DataSourceError> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(stripped).map_err(|e| DataSourceError::ParseError(format!("invalid hex: {}", e)))
}

fn parse_hex_u64(raw: &str) -> Result<u64, DataSourceError> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| DataSourceError::ParseError(format!("invalid quantity {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(hex_tail: &str) -> String {
        format!("{:0>64}", hex_tail)
    }

    #[test]
    fn test_selectors() {
        assert_eq!(IERC20::balanceOfCall::SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(IVault::convertToSharesCall::SELECTOR, [0xc6, 0xe6, 0xf5, 0x92]);
        assert_eq!(IStateView::getSlot0Call::SIGNATURE, "getSlot0(bytes32)");
    }

    #[test]
    fn test_get_slot0_call_layout() {
        let pool = PoolId::parse(&format!("0x{}", "11".repeat(32))).unwrap();
        let data = IStateView::getSlot0Call {
            poolId: pool_key(&pool).unwrap(),
        }
        .abi_encode();
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &IStateView::getSlot0Call::SELECTOR);
        assert!(data[4..].iter().all(|b| *b == 0x11));
    }

    #[test]
    fn test_tick_argument_is_sign_extended() {
        let pool = PoolId::parse(&format!("0x{}", "22".repeat(32))).unwrap();
        let data = IStateView::getTickLiquidityCall {
            poolId: pool_key(&pool).unwrap(),
            tick: to_int24(-60).unwrap(),
        }
        .abi_encode();
        assert_eq!(data.len(), 4 + 64);
        assert!(data[36..64].iter().all(|b| *b == 0xff));
        assert_eq!(data[67], 0xc4);
        assert!(to_int24(8_388_608).is_err());
    }

    #[test]
    fn test_decode_slot0_with_negative_tick() {
        let q96 = BigUint::from(1u8) << 96u32;
        let raw = format!(
            "{}{}{}{}",
            word(&q96.to_str_radix(16)),
            "f".repeat(62) + "c4",
            word("0"),
            word("bb8")
        );
        let out = IStateView::getSlot0Call::abi_decode_returns(&hex::decode(raw).unwrap(), true).unwrap();
        assert_eq!(to_biguint(out.sqrtPriceX96), q96);
        assert_eq!(from_int24(out.tick).unwrap(), -60);
    }

    #[test]
    fn test_decode_tick_liquidity_net_is_signed() {
        let raw = format!("{}{}", word("64"), "f".repeat(62) + "9c");
        let out =
            IStateView::getTickLiquidityCall::abi_decode_returns(&hex::decode(raw).unwrap(), true)
                .unwrap();
        assert_eq!(out.liquidityGross, 100);
        assert_eq!(out.liquidityNet, -100);
    }

    #[test]
    fn test_short_return_data_is_rejected() {
        let raw = word("1");
        assert!(
            IStateView::getSlot0Call::abi_decode_returns(&hex::decode(raw).unwrap(), true).is_err()
        );
    }

    #[test]
    fn test_u256_conversion_bounds() {
        let value = BigUint::from(1u8) << 200u32;
        assert_eq!(to_biguint(to_u256(&value).unwrap()), value);
        assert!(to_u256(&(BigUint::from(1u8) << 256u32)).is_err());
    }

    #[test]
    fn test_extract_result() {
        let ok = extract_result(json!({"jsonrpc": "2.0", "id": 1, "result": "0x01"})).unwrap();
        assert_eq!(ok, json!("0x01"));
        let err = extract_result(json!({"error": {"code": 3, "message": "execution reverted"}}))
            .unwrap_err();
        assert_eq!(err, DataSourceError::Rejected("execution reverted".to_string()));
    }

    #[test]
    fn test_parse_block_timestamp() {
        assert_eq!(parse_hex_u64("0x6553f100").unwrap(), 1_700_000_000);
        assert!(parse_hex_u64("0xzz").is_err());
    }
}

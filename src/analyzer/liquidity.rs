use crate::error::RpcError;
use crate::rpc::client::{ChainClient, RpcResult};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

alloy::sol! {
    interface IUniswapV2FactoryView {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }

    interface IUniswapV2PairView {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
    }
}

/// One native unit at 18 decimals.
pub const ONE_NATIVE_WEI: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairLiquidity {
    pub pair: Address,
    /// Wrapped-native side of the reserves, in wei.
    pub native_reserve: U256,
}

fn decode_err(client: &dyn ChainClient, what: &str, err: impl std::fmt::Display) -> RpcError {
    RpcError::decode(client.endpoint(), format!("{what}: {err}"))
}

/// Locate the `token`/`wrapped_native` pair on a UniswapV2-style factory and read the
/// wrapped-native reserve. `Ok(None)` when no pair exists.
pub async fn probe_pair_liquidity(
    client: &dyn ChainClient,
    factory: Address,
    wrapped_native: Address,
    token: Address,
) -> RpcResult<Option<PairLiquidity>> {
    let get_pair = IUniswapV2FactoryView::getPairCall {
        tokenA: token,
        tokenB: wrapped_native,
    };
    let raw = client.call(factory, Bytes::from(get_pair.abi_encode())).await?;
    let pair =
        <IUniswapV2FactoryView::getPairCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
            .map_err(|e| decode_err(client, "getPair", e))?
            .pair;
    if pair == Address::ZERO {
        return Ok(None);
    }

    let raw = client
        .call(pair, Bytes::from(IUniswapV2PairView::getReservesCall {}.abi_encode()))
        .await?;
    let reserves =
        <IUniswapV2PairView::getReservesCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
            .map_err(|e| decode_err(client, "getReserves", e))?;

    let raw = client
        .call(pair, Bytes::from(IUniswapV2PairView::token0Call {}.abi_encode()))
        .await?;
    let token0 = <IUniswapV2PairView::token0Call as SolCall>::abi_decode_returns(raw.as_ref(), true)
        .map_err(|e| decode_err(client, "token0", e))?
        ._0;

    let reserve0 = U256::from(reserves.reserve0.to::<u128>());
    let reserve1 = U256::from(reserves.reserve1.to::<u128>());
    let native_reserve = if token0 == wrapped_native {
        reserve0
    } else {
        reserve1
    };
    Ok(Some(PairLiquidity {
        pair,
        native_reserve,
    }))
}

/// Reserve rendered in native units with four decimals, for feature labels.
pub fn format_native_amount(wei: U256) -> String {
    let unit = U256::from(ONE_NATIVE_WEI);
    let whole = wei / unit;
    let frac = (wei % unit) / U256::from(100_000_000_000_000u64);
    format!("{whole}.{:04}", frac.to::<u64>())
}

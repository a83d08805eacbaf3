use crate::data_sync::rpc::JsonRpcClient;
use crate::errors::{MirrorError, MirrorResult};
use crate::pool::{CurveParams, ReserveTriple, RouterPool, SwapFees};
use alloy_primitives::Address;
use alloy_sol_types::sol;
use async_trait::async_trait;

sol! {
    /// Router directory. `getRouterPools` returns `(assets, pools)`, zipped by index.
    interface IPortal {
        function getRouters() external view returns (address[] memory routers);
        function getRouterPools(address router) external view returns (address[] memory assets, address[] memory pools);
    }

    interface ISwapPool {
        function asset() external view returns (address);
        function swapFees() external view returns (uint256 lpFee, uint256 backstopFee, uint256 protocolFee);
        function curveParams() external view returns (uint256 beta, uint256 c);
        function reserve() external view returns (uint256);
        function reserveWithSlippage() external view returns (uint256);
        function totalLiabilities() external view returns (uint256);
    }

    interface IERC20Metadata {
        function decimals() external view returns (uint8);
    }
}

/// Direct chain reads used during discovery, initialization and reconciliation.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> MirrorResult<u64>;

    async fn routers(&self) -> MirrorResult<Vec<Address>>;

    async fn router_pools(&self, router: Address) -> MirrorResult<Vec<RouterPool>>;

    async fn swap_fees(&self, pool: Address) -> MirrorResult<SwapFees>;

    async fn curve_params(&self, pool: Address) -> MirrorResult<CurveParams>;

    /// All three reserve fields, read at the same block.
    async fn reserves(&self, pool: Address) -> MirrorResult<ReserveTriple>;

    async fn decimals(&self, token: Address) -> MirrorResult<u8>;
}

/// Zip the `(assets, pools)` pair returned by `getRouterPools`.
pub fn zip_router_pools(router: Address, assets: Vec<Address>, pools: Vec<Address>) -> MirrorResult<Vec<RouterPool>> {
    if assets.len() != pools.len() {
        return Err(MirrorError::Discovery(format!(
            "router {} returned {} assets but {} pools",
            router,
            assets.len(),
            pools.len()
        )));
    }
    Ok(assets.into_iter().zip(pools).map(|(asset, pool)| RouterPool::new(asset, pool)).collect())
}

/// [`ChainReader`] over JSON-RPC `eth_call`.
#[derive(Debug, Clone)]
pub struct RpcChainReader {
    client: JsonRpcClient,
    portal_address: Address,
}

impl RpcChainReader {
    pub fn new(client: JsonRpcClient, portal_address: Address) -> Self {
        Self { client, portal_address }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_number(&self) -> MirrorResult<u64> {
        self.client.block_number().await
    }

    async fn routers(&self) -> MirrorResult<Vec<Address>> {
        self.client.call(self.portal_address, IPortal::getRoutersCall {}).await
    }

    async fn router_pools(&self, router: Address) -> MirrorResult<Vec<RouterPool>> {
        let ret = self.client.call(self.portal_address, IPortal::getRouterPoolsCall { router }).await?;
        zip_router_pools(router, ret.assets, ret.pools)
    }

    async fn swap_fees(&self, pool: Address) -> MirrorResult<SwapFees> {
        let ret = self.client.call(pool, ISwapPool::swapFeesCall {}).await?;
        Ok(SwapFees::new(ret.lpFee, ret.backstopFee, ret.protocolFee))
    }

    async fn curve_params(&self, pool: Address) -> MirrorResult<CurveParams> {
        let ret = self.client.call(pool, ISwapPool::curveParamsCall {}).await?;
        Ok(CurveParams { beta: ret.beta, c: ret.c })
    }

    async fn reserves(&self, pool: Address) -> MirrorResult<ReserveTriple> {
        let (reserve, reserve_with_slippage, total_liabilities) = tokio::try_join!(
            self.client.call(pool, ISwapPool::reserveCall {}),
            self.client.call(pool, ISwapPool::reserveWithSlippageCall {}),
            self.client.call(pool, ISwapPool::totalLiabilitiesCall {}),
        )?;
        Ok(ReserveTriple::new(reserve, reserve_with_slippage, total_liabilities))
    }

    async fn decimals(&self, token: Address) -> MirrorResult<u8> {
        self.client.call(token, IERC20Metadata::decimalsCall {}).await
    }
}

use crate::data_sync::chain::ChainReader;
use crate::errors::{MirrorError, MirrorResult};
use crate::pool::{Router, RouterPool};
use alloy_primitives::Address;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a topology update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistryChange {
    Added,
    /// The pool was owned by another router and moved here.
    Moved { from: Address },
    Removed,
    Unchanged,
}

impl RegistryChange {
    /// The pool is newly tracked under the event's router.
    pub fn is_new_pool(&self) -> bool {
        matches!(self, RegistryChange::Added | RegistryChange::Moved { .. })
    }
}

/// Pools added to and removed from one router by a topology reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub added: Vec<RouterPool>,
    pub removed: Vec<RouterPool>,
}

#[derive(Default)]
struct RegistryState {
    // routers in discovery order
    routers: Vec<Router>,
    // pool -> owning router
    pool_owner: HashMap<Address, Address>,
    // router -> block read just before its pool listing
    listed_at: HashMap<Address, u64>,
}

impl RegistryState {
    fn router_mut(&mut self, address: Address) -> &mut Router {
        let idx = match self.routers.iter().position(|r| r.address == address) {
            Some(idx) => idx,
            None => {
                warn!("Router {} not seen during discovery, tracking it now", address);
                self.routers.push(Router::new(address));
                self.routers.len() - 1
            }
        };
        &mut self.routers[idx]
    }

    fn insert(&mut self, router: Address, entry: RouterPool) -> RegistryChange {
        let previous_owner = self.pool_owner.get(&entry.pool).copied();

        if previous_owner == Some(router) {
            // last write wins for the asset
            if let Some(existing) = self.router_mut(router).pools.iter_mut().find(|p| p.pool == entry.pool) {
                existing.asset = entry.asset;
                return RegistryChange::Unchanged;
            }
        }

        let change = match previous_owner {
            Some(from) if from != router => {
                self.router_mut(from).pools.retain(|p| p.pool != entry.pool);
                RegistryChange::Moved { from }
            }
            _ => RegistryChange::Added,
        };

        self.router_mut(router).pools.push(entry);
        self.pool_owner.insert(entry.pool, router);
        change
    }

    fn remove(&mut self, router: Address, pool: Address) -> RegistryChange {
        let target = self.router_mut(router);
        let before = target.pools.len();
        target.pools.retain(|p| p.pool != pool);
        let removed = target.pools.len() != before;

        if self.pool_owner.get(&pool) == Some(&router) {
            self.pool_owner.remove(&pool);
        }

        if removed { RegistryChange::Removed } else { RegistryChange::Unchanged }
    }
}

/// Routers and the pools they own.
///
/// Populated in bulk by [`RouterRegistry::discover`] and patched afterwards by topology
/// events. Updates are refused until discovery has published a complete registry, so an
/// event can never be overwritten by the bulk fetch it raced with. Reads return copies.
#[derive(Default)]
pub struct RouterRegistry {
    state: RwLock<RegistryState>,
    discovered: AtomicBool,
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered.load(Ordering::Acquire)
    }

    /// Enumerate every router and its pools. Nothing is published unless every read succeeds.
    pub async fn discover(&self, chain: &dyn ChainReader) -> MirrorResult<Vec<Router>> {
        let start_time = Instant::now();

        // the listings below reflect every log up to this block
        let block = chain.block_number().await.map_err(|e| MirrorError::Discovery(format!("block number: {}", e)))?;
        let router_addresses = chain.routers().await.map_err(|e| MirrorError::Discovery(format!("router list: {}", e)))?;
        info!("Discovering pools of {} routers", router_addresses.len());

        let listings = try_join_all(router_addresses.iter().map(|router| async move {
            chain
                .router_pools(*router)
                .await
                .map(|pools| (*router, pools))
                .map_err(|e| MirrorError::Discovery(format!("pools of router {}: {}", router, e)))
        }))
        .await?;

        let mut state = RegistryState::default();
        for (router, pools) in listings {
            // routers with no pools are still tracked
            if !state.routers.iter().any(|r| r.address == router) {
                state.routers.push(Router::new(router));
            }
            state.listed_at.insert(router, block);
            for entry in pools {
                state.insert(router, entry);
            }
        }

        let routers = state.routers.clone();
        let pool_count = state.pool_owner.len();

        *self.write() = state;
        self.discovered.store(true, Ordering::Release);

        info!("Discovery completed in {:?} at block {}: {} routers, {} pools", start_time.elapsed(), block, routers.len(), pool_count);
        Ok(routers)
    }

    pub fn apply_asset_registered(&self, router: Address, asset: Address, pool: Address) -> MirrorResult<RegistryChange> {
        if !self.is_discovered() {
            return Err(MirrorError::DiscoveryIncomplete);
        }
        let change = self.write().insert(router, RouterPool::new(asset, pool));
        debug!("AssetRegistered router={} asset={} pool={}: {:?}", router, asset, pool, change);
        Ok(change)
    }

    pub fn apply_asset_unregistered(&self, router: Address, asset: Address, pool: Address) -> MirrorResult<RegistryChange> {
        if !self.is_discovered() {
            return Err(MirrorError::DiscoveryIncomplete);
        }
        let change = self.write().remove(router, pool);
        debug!("AssetUnregistered router={} asset={} pool={}: {:?}", router, asset, pool, change);
        Ok(change)
    }

    /// Replace one router's pool list with a fresh chain read, keeping the discovery
    /// order of pools that are still present. `listed_at` is the block read just before
    /// the listing.
    pub fn reconcile_router(&self, router: Address, pools: Vec<RouterPool>, listed_at: u64) -> MirrorResult<TopologyDiff> {
        if !self.is_discovered() {
            return Err(MirrorError::DiscoveryIncomplete);
        }

        let mut state = self.write();
        let current = state.router_mut(router).pools.clone();

        let mut diff = TopologyDiff::default();
        for entry in current.iter().filter(|p| !pools.iter().any(|n| n.pool == p.pool)) {
            state.remove(router, entry.pool);
            diff.removed.push(*entry);
        }
        for entry in pools {
            if state.insert(router, entry).is_new_pool() {
                diff.added.push(entry);
            }
        }
        state.listed_at.insert(router, listed_at);
        Ok(diff)
    }

    pub fn routers(&self) -> Vec<Router> {
        self.read().routers.clone()
    }

    pub fn router(&self, address: &Address) -> Option<Router> {
        self.read().routers.iter().find(|r| r.address == *address).cloned()
    }

    pub fn contains_router(&self, address: &Address) -> bool {
        self.read().routers.iter().any(|r| r.address == *address)
    }

    /// Block up to which `router`'s topology logs are reflected in its last listing.
    pub fn listed_block(&self, router: &Address) -> Option<u64> {
        self.read().listed_at.get(router).copied()
    }

    pub fn router_of(&self, pool: &Address) -> Option<Address> {
        self.read().pool_owner.get(pool).copied()
    }

    /// Every pool currently owned by some router.
    pub fn tracked_pools(&self) -> Vec<RouterPool> {
        self.read().routers.iter().flat_map(|r| r.pools.iter().copied()).collect()
    }

    pub fn is_tracked(&self, pool: &Address) -> bool {
        self.read().pool_owner.contains_key(pool)
    }
}

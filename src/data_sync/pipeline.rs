use crate::data_sync::chain::ChainReader;
use crate::data_sync::events::{ChainEvent, EventPosition, PositionedEvent};
use crate::data_sync::registry::{RegistryChange, RouterRegistry, TopologyDiff};
use crate::data_sync::store::PoolStateStore;
use crate::data_sync::websocket::StreamItem;
use crate::errors::{MirrorError, MirrorResult};
use alloy_primitives::Address;
use eyre::eyre;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub applied: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
    pub reconciliations: AtomicU64,
}

impl PipelineStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn reconciliations(&self) -> u64 {
        self.reconciliations.load(Ordering::Relaxed)
    }
}

/// Outcome of [`EventIngestionPipeline::reconcile_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub reconciled: usize,
    pub failed: Vec<Address>,
}

enum ShardCommand {
    Apply(PositionedEvent),
    /// Re-read one pool.
    Resync { pool: Address, reply: Option<oneshot::Sender<MirrorResult<u64>>> },
    /// Re-read every tracked pool of this shard.
    ReconcileShard { reply: Option<oneshot::Sender<ReconcileReport>> },
    /// Acknowledged once everything queued before it has been processed.
    Barrier(oneshot::Sender<()>),
}

/// Requests made through the public API while the pipeline runs. The dispatcher
/// serves them between stream items.
enum ControlCommand {
    ReconcilePool { pool: Address, reply: oneshot::Sender<MirrorResult<u64>> },
    ReconcileAll { reply: oneshot::Sender<MirrorResult<ReconcileReport>> },
}

/// Handles of a running pipeline.
pub struct PipelineHandle {
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_finished()
    }

    /// Wait until the dispatcher and every worker have exited.
    pub async fn join(self) {
        if let Err(e) = self.dispatcher.await {
            warn!("Pipeline dispatcher error during shutdown: {}", e);
        }
        for worker in join_all(self.workers).await {
            if let Err(e) = worker {
                warn!("Pipeline worker error during shutdown: {}", e);
            }
        }
    }
}

/// Routes stream items to the registry and the store.
///
/// Events are partitioned by pool over `shards` workers. Each worker applies its queue
/// sequentially, so one pool's events keep their chain order while different pools
/// proceed independently. A worker keeps two cursors per pool, one for topology logs and
/// one for reserve and fee logs, and drops anything at or before the matching cursor,
/// which makes replays after a reconnect harmless.
///
/// Once started, every write to a pool's metadata and reserves happens on that pool's
/// worker, including the reconciliations requested through [`Self::reconcile_pool`] and
/// [`Self::reconcile_all`].
pub struct EventIngestionPipeline {
    chain: Arc<dyn ChainReader>,
    registry: Arc<RouterRegistry>,
    store: Arc<PoolStateStore>,
    shards: usize,
    channel_buffer_size: usize,
    stats: Arc<PipelineStats>,
    // set while the dispatcher runs
    control: Mutex<Option<mpsc::Sender<ControlCommand>>>,
}

impl EventIngestionPipeline {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        registry: Arc<RouterRegistry>,
        store: Arc<PoolStateStore>,
        shards: usize,
        channel_buffer_size: usize,
    ) -> Self {
        Self {
            chain,
            registry,
            store,
            shards: shards.max(1),
            channel_buffer_size: channel_buffer_size.max(1),
            stats: Arc::new(PipelineStats::default()),
            control: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn shard_for(pool: &Address, shards: usize) -> usize {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&pool.as_slice()[12..20]);
        (u64::from_be_bytes(tail) % shards as u64) as usize
    }

    fn control_slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<ControlCommand>>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(self: Arc<Self>, items: mpsc::Receiver<StreamItem>, shutdown: watch::Receiver<bool>) -> PipelineHandle {
        let mut senders = Vec::with_capacity(self.shards);
        let mut workers = Vec::with_capacity(self.shards);

        for shard in 0..self.shards {
            let (tx, rx) = mpsc::channel(self.channel_buffer_size);
            senders.push(tx);
            let worker = ShardWorker { shard, pipeline: Arc::clone(&self), state_cursors: HashMap::new(), topology_cursors: HashMap::new() };
            workers.push(tokio::spawn(worker.run(rx)));
        }

        let (control_tx, control_rx) = mpsc::channel(self.channel_buffer_size);
        *self.control_slot() = Some(control_tx);

        let dispatcher = tokio::spawn(Arc::clone(&self).dispatch(items, control_rx, senders, shutdown));
        info!("Event pipeline started with {} shards", self.shards);

        PipelineHandle { dispatcher, workers }
    }

    async fn dispatch(
        self: Arc<Self>,
        mut items: mpsc::Receiver<StreamItem>,
        mut control: mpsc::Receiver<ControlCommand>,
        senders: Vec<mpsc::Sender<ShardCommand>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let item = tokio::select! {
                item = items.recv() => item,
                Some(command) = control.recv() => {
                    if !self.serve(command, &senders).await {
                        error!("Pipeline worker stopped, stopping dispatch");
                        break;
                    }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Event pipeline received shutdown signal");
                        break;
                    }
                    continue;
                }
            };

            let Some(item) = item else {
                error!("Event stream closed, stopping dispatch");
                break;
            };

            let delivered = match item {
                StreamItem::Event(event) => {
                    let shard = Self::shard_for(&event.event.pool(), senders.len());
                    senders[shard].send(ShardCommand::Apply(event)).await.is_ok()
                }
                StreamItem::Resync { pool } => {
                    let shard = Self::shard_for(&pool, senders.len());
                    senders[shard].send(ShardCommand::Resync { pool, reply: None }).await.is_ok()
                }
                StreamItem::Gap { last_confirmed } => {
                    warn!("Event stream gap after {:?}, reconciling", last_confirmed);
                    self.reconcile_gap(&senders).await
                }
            };

            if !delivered {
                error!("Pipeline worker stopped, stopping dispatch");
                break;
            }
        }

        // later requests run directly, there is no concurrent writer left
        self.control_slot().take();
        // dropping the senders lets workers drain their queues and exit
        drop(senders);
        info!("Event pipeline dispatcher ended");
    }

    /// Wait until every shard has processed what was queued so far.
    async fn drain(&self, senders: &[mpsc::Sender<ShardCommand>]) -> bool {
        let mut acks = Vec::with_capacity(senders.len());
        for sender in senders {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(ShardCommand::Barrier(ack_tx)).await.is_err() {
                return false;
            }
            acks.push(ack_rx);
        }
        join_all(acks).await.iter().all(|ack| ack.is_ok())
    }

    /// Drain every shard, re-read topology, then have every shard re-read its pools.
    async fn reconcile_gap(&self, senders: &[mpsc::Sender<ShardCommand>]) -> bool {
        if !self.drain(senders).await {
            return false;
        }

        if let Err(e) = self.reconcile_topology().await {
            warn!("Topology reconciliation incomplete: {}", e);
        }

        for sender in senders {
            if sender.send(ShardCommand::ReconcileShard { reply: None }).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn serve(&self, command: ControlCommand, senders: &[mpsc::Sender<ShardCommand>]) -> bool {
        match command {
            ControlCommand::ReconcilePool { pool, reply } => {
                let shard = Self::shard_for(&pool, senders.len());
                senders[shard].send(ShardCommand::Resync { pool, reply: Some(reply) }).await.is_ok()
            }
            ControlCommand::ReconcileAll { reply } => {
                if !self.drain(senders).await {
                    return false;
                }
                if let Err(e) = self.reconcile_topology().await {
                    let _ = reply.send(Err(e));
                    return true;
                }

                let mut reports = Vec::with_capacity(senders.len());
                for sender in senders {
                    let (report_tx, report_rx) = oneshot::channel();
                    if sender.send(ShardCommand::ReconcileShard { reply: Some(report_tx) }).await.is_err() {
                        return false;
                    }
                    reports.push(report_rx);
                }

                // collected off the dispatcher so stream items keep flowing
                tokio::spawn(async move {
                    let mut total = ReconcileReport::default();
                    for report in join_all(reports).await.into_iter().flatten() {
                        total.reconciled += report.reconciled;
                        total.failed.extend(report.failed);
                    }
                    let _ = reply.send(Ok(total));
                });
                true
            }
        }
    }

    /// Re-enumerate every router's pools and patch the registry to match the chain.
    /// Newly found pools are registered in the store but not read yet.
    async fn reconcile_topology(&self) -> MirrorResult<TopologyDiff> {
        let mut total = TopologyDiff::default();

        let block = self.chain.block_number().await?;
        for router in self.chain.routers().await? {
            let pools = match self.chain.router_pools(router).await {
                Ok(pools) => pools,
                Err(e) => {
                    warn!("Cannot re-read pools of router {}: {}", router, e);
                    continue;
                }
            };

            let diff = self.registry.reconcile_router(router, pools, block)?;
            for entry in &diff.added {
                self.store.register(entry.pool, entry.asset);
            }
            if !diff.added.is_empty() || !diff.removed.is_empty() {
                info!("Router {} reconciled: {} pools added, {} removed", router, diff.added.len(), diff.removed.len());
            }
            total.added.extend(diff.added);
            total.removed.extend(diff.removed);
        }
        Ok(total)
    }

    /// Re-read one pool's metadata and reserves, keeping its price.
    /// Returns the block the state was read at; events up to it are dropped afterwards.
    ///
    /// While the pipeline runs the read is queued behind the pool's pending events.
    pub async fn reconcile_pool(&self, pool: Address) -> MirrorResult<u64> {
        let control = self.control_slot().clone();
        let Some(control) = control else {
            return self.reconcile_pool_now(pool).await;
        };

        let (reply, result) = oneshot::channel();
        control.send(ControlCommand::ReconcilePool { pool, reply }).await.map_err(|_| pipeline_stopped())?;
        result.await.map_err(|_| pipeline_stopped())?
    }

    /// Re-read topology, then every tracked pool. Failures stay local to their pool.
    pub async fn reconcile_all(&self) -> MirrorResult<ReconcileReport> {
        let control = self.control_slot().clone();
        let Some(control) = control else {
            return self.reconcile_all_now().await;
        };

        let (reply, result) = oneshot::channel();
        control.send(ControlCommand::ReconcileAll { reply }).await.map_err(|_| pipeline_stopped())?;
        result.await.map_err(|_| pipeline_stopped())?
    }

    async fn reconcile_pool_now(&self, pool: Address) -> MirrorResult<u64> {
        if !self.store.contains(&pool) {
            let asset = self.registry.tracked_pools().into_iter().find(|p| p.pool == pool).map(|p| p.asset);
            match asset {
                Some(asset) => self.store.register(pool, asset),
                None => return Err(MirrorError::UnknownPool(pool)),
            }
        }

        match self.store.reconcile(self.chain.as_ref(), pool).await {
            Ok(block) => {
                self.stats.reconciliations.fetch_add(1, Ordering::Relaxed);
                Ok(block)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn reconcile_all_now(&self) -> MirrorResult<ReconcileReport> {
        self.reconcile_topology().await?;

        let pools: Vec<Address> = self.registry.tracked_pools().into_iter().map(|entry| entry.pool).collect();
        let results = join_all(pools.iter().map(|pool| self.reconcile_pool_now(*pool))).await;

        let mut report = ReconcileReport::default();
        for (pool, result) in pools.into_iter().zip(results) {
            match result {
                Ok(_) => report.reconciled += 1,
                Err(e) => {
                    warn!("Failed to reconcile pool {}: {}", pool, e);
                    report.failed.push(pool);
                }
            }
        }
        Ok(report)
    }

    /// Whether `router` may change topology: already known, or listed by the portal.
    async fn is_router(&self, router: Address) -> MirrorResult<bool> {
        if self.registry.contains_router(&router) {
            return Ok(true);
        }
        Ok(self.chain.routers().await?.contains(&router))
    }

    /// Apply one event to the registry or the store. Returns whether it changed anything.
    async fn apply(&self, event: &PositionedEvent) -> MirrorResult<bool> {
        if let ChainEvent::AssetRegistered { router, .. } | ChainEvent::AssetUnregistered { router, .. } = event.event {
            if !self.is_router(router).await? {
                debug!("{} from unknown emitter {} dropped", event.event.kind(), router);
                return Ok(false);
            }
        } else if !self.registry.is_tracked(&event.event.pool()) {
            debug!("{} from untracked pool {} dropped", event.event.kind(), event.event.pool());
            return Ok(false);
        }

        match event.event {
            ChainEvent::AssetRegistered { router, asset, pool } => {
                let change = self.registry.apply_asset_registered(router, asset, pool)?;
                let initialized = self.store.snapshot(&pool).is_some_and(|s| s.is_initialized());
                match change {
                    // cached state dates from before the pool was unregistered
                    RegistryChange::Added if initialized => {
                        self.store.reconcile(self.chain.as_ref(), pool).await?;
                    }
                    change if change.is_new_pool() && !initialized => {
                        self.store.register(pool, asset);
                        self.store.initialize(self.chain.as_ref(), pool).await?;
                    }
                    _ => {}
                }
                Ok(change.is_new_pool())
            }
            ChainEvent::AssetUnregistered { router, asset, pool } => {
                let change = self.registry.apply_asset_unregistered(router, asset, pool)?;
                Ok(change != RegistryChange::Unchanged)
            }
            ChainEvent::ReserveUpdated { pool, reserves } => {
                Ok(self.store.apply_reserve_updated(pool, reserves, Some(event.position.block_number)))
            }
            ChainEvent::SwapFeesSet { pool, fees } => Ok(self.store.apply_swap_fees_set(pool, fees)),
        }
    }
}

fn pipeline_stopped() -> MirrorError {
    MirrorError::Internal(eyre!("event pipeline stopped before serving the request"))
}

struct ShardWorker {
    shard: usize,
    pipeline: Arc<EventIngestionPipeline>,
    // pool -> last processed reserve or fee position
    state_cursors: HashMap<Address, EventPosition>,
    // pool -> last processed topology position
    topology_cursors: HashMap<Address, EventPosition>,
}

impl ShardWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<ShardCommand>) {
        debug!("Pipeline shard {} started", self.shard);

        while let Some(command) = commands.recv().await {
            match command {
                ShardCommand::Apply(event) => self.handle_event(event).await,
                ShardCommand::Resync { pool, reply } => {
                    let result = self.resync(pool).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                ShardCommand::ReconcileShard { reply } => {
                    let report = self.reconcile_shard().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                }
                ShardCommand::Barrier(ack) => {
                    let _ = ack.send(());
                }
            }
        }

        debug!("Pipeline shard {} ended", self.shard);
    }

    /// Latest position already reflected for this kind of event on its pool. Topology is
    /// floored at the router's last listing, reserves and fees at the pool's last direct read.
    fn cursor(&self, event: &ChainEvent) -> Option<EventPosition> {
        let pool = event.pool();
        match event {
            ChainEvent::AssetRegistered { router, .. } | ChainEvent::AssetUnregistered { router, .. } => {
                let listed = self.pipeline.registry.listed_block(router).map(EventPosition::end_of_block);
                self.topology_cursors.get(&pool).copied().max(listed)
            }
            ChainEvent::ReserveUpdated { .. } | ChainEvent::SwapFeesSet { .. } => {
                let synced = self.pipeline.store.synced_block(&pool).map(EventPosition::end_of_block);
                self.state_cursors.get(&pool).copied().max(synced)
            }
        }
    }

    async fn handle_event(&mut self, event: PositionedEvent) {
        let pool = event.event.pool();
        let stats = &self.pipeline.stats;

        if event.removed {
            warn!("{} for {} at {} removed by reorg, resyncing pool", event.event.kind(), pool, event.position);
            self.state_cursors.remove(&pool);
            self.topology_cursors.remove(&pool);
            let _ = self.resync(pool).await;
            return;
        }

        if self.cursor(&event.event).is_some_and(|cursor| event.position <= cursor) {
            debug!("{} for {} at {} already reflected, dropped", event.event.kind(), pool, event.position);
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.pipeline.apply(&event).await {
            Ok(true) => {
                stats.applied.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_pool_local() => {
                warn!("Failed to apply {} for {} at {}: {}", event.event.kind(), pool, event.position, e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to apply {} for {} at {}: {}", event.event.kind(), pool, event.position, e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let cursors = if event.event.is_topology() { &mut self.topology_cursors } else { &mut self.state_cursors };
        cursors.insert(pool, event.position);
    }

    async fn resync(&mut self, pool: Address) -> MirrorResult<u64> {
        let result = self.pipeline.reconcile_pool_now(pool).await;
        match &result {
            Ok(block) => debug!("Pool {} resynced at block {}", pool, block),
            Err(MirrorError::UnknownPool(_)) => debug!("Resync requested for untracked pool {}, ignored", pool),
            Err(e) => warn!("Failed to reconcile pool {}: {}", pool, e),
        }
        result
    }

    async fn reconcile_shard(&mut self) -> ReconcileReport {
        let shards = self.pipeline.shards;
        let pools: Vec<Address> = self
            .pipeline
            .registry
            .tracked_pools()
            .into_iter()
            .map(|entry| entry.pool)
            .filter(|pool| EventIngestionPipeline::shard_for(pool, shards) == self.shard)
            .collect();

        let mut report = ReconcileReport::default();
        for pool in pools {
            match self.resync(pool).await {
                Ok(_) => report.reconciled += 1,
                Err(_) => report.failed.push(pool),
            }
        }
        info!("Shard {} reconciled {} pools, {} failed", self.shard, report.reconciled, report.failed.len());
        report
    }
}

use alloy_primitives::{Address, U256};
use criterion::{Criterion, criterion_group, criterion_main};
use pool_mirror::{
    CurveParams, LinearCurve, PoolDynamicState, PoolMetadata, PoolSnapshot, Price, QuoteSimulator, ReserveTriple, RouteFinder, Router,
    RouterPool, SwapFees,
};
use std::hint::black_box;
use std::sync::Arc;

fn ready_pool(price: u64) -> PoolSnapshot {
    let reserve = U256::from(10).pow(U256::from(30));
    let mut snapshot = PoolSnapshot::new(Address::random(), Address::random());
    snapshot.metadata = Some(PoolMetadata {
        decimals: 18,
        curve: CurveParams::default(),
        fees: SwapFees::new(U256::from(100), U256::from(50), U256::from(50)),
    });
    let mut state = PoolDynamicState::new(ReserveTriple::new(reserve, reserve, reserve), Some(1));
    state.price = Price::Known(U256::from(price));
    snapshot.state = Some(state);
    snapshot
}

fn large_topology() -> Vec<Router> {
    let hub = Address::random();
    (0..100)
        .map(|_| {
            let mut router = Router::new(Address::random());
            router.pools.push(RouterPool::new(hub, Address::random()));
            for _ in 0..10 {
                router.pools.push(RouterPool::new(Address::random(), Address::random()));
            }
            router
        })
        .collect()
}

fn benchmark_simulation(c: &mut Criterion) {
    let simulator = QuoteSimulator::new(Arc::new(LinearCurve));
    let path: Vec<PoolSnapshot> = [100, 200, 50, 400].into_iter().map(ready_pool).collect();
    let amount_in = U256::from(10).pow(U256::from(18));

    let mut group = c.benchmark_group("simulate");
    group.bench_function("single_hop", |b| b.iter(|| simulator.simulate(black_box(&path[0]), black_box(&path[1]), amount_in)));
    group.bench_function("three_hops", |b| b.iter(|| simulator.simulate_path(black_box(&path), amount_in)));
    group.finish();
}

fn benchmark_route_finding(c: &mut Criterion) {
    let routers = large_topology();
    let from = routers[0].pools[1].asset;
    let to = routers[99].pools[10].asset;

    let mut group = c.benchmark_group("route_finder");
    group.sample_size(10);
    group.bench_function("build_graph", |b| b.iter(|| RouteFinder::new(black_box(&routers))));

    let finder = RouteFinder::new(&routers);
    group.bench_function("find_route", |b| b.iter(|| finder.find_route(black_box(from), black_box(to), 4)));
    group.finish();
}

criterion_group!(benches, benchmark_simulation, benchmark_route_finding);
criterion_main!(benches);

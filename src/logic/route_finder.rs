use crate::errors::{MirrorError, MirrorResult};
use crate::pool::Router;
use alloy_primitives::Address;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;

/// One swap inside a single router: `asset_in` enters through `pool_in`, `asset_out`
/// leaves through `pool_out`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub router: Address,
    pub asset_in: Address,
    pub asset_out: Address,
    pub pool_in: Address,
    pub pool_out: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<Hop>,
}

impl Route {
    /// Assets visited, first input to final output.
    pub fn token_path(&self) -> Vec<Address> {
        let mut path: Vec<Address> = self.hops.first().map(|hop| vec![hop.asset_in]).unwrap_or_default();
        path.extend(self.hops.iter().map(|hop| hop.asset_out));
        path
    }

    /// Router of every hop.
    pub fn router_path(&self) -> Vec<Address> {
        self.hops.iter().map(|hop| hop.router).collect()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let assets: Vec<String> = self.token_path().iter().map(|asset| format!("{:#}", asset)).collect();
        write!(f, "{}", assets.join(" -> "))
    }
}

/// Two pools of one router, holding the edge's two assets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterEdge {
    pub router: Address,
    // (asset, pool) for each end
    pub ends: [(Address, Address); 2],
}

impl RouterEdge {
    fn pool_of(&self, asset: Address) -> Option<Address> {
        self.ends.iter().find(|(a, _)| *a == asset).map(|(_, pool)| *pool)
    }
}

/// Graph of assets where two assets are connected when some router holds a pool for each.
///
/// Built from a registry copy; rebuild it after topology changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteFinder {
    // nodes are assets, an edge lists every router able to swap between its two assets
    pub graph: UnGraph<Address, Vec<RouterEdge>, usize>,
    // asset -> node index
    pub asset_index: HashMap<Address, NodeIndex<usize>>,
}

impl RouteFinder {
    pub fn new(routers: &[Router]) -> Self {
        let mut finder = Self::default();
        for router in routers {
            finder.add_router(router);
        }
        finder
    }

    fn add_or_get_asset_idx(&mut self, asset: Address) -> NodeIndex<usize> {
        *self.asset_index.entry(asset).or_insert_with(|| self.graph.add_node(asset))
    }

    pub fn add_router(&mut self, router: &Router) {
        for (i, a) in router.pools.iter().enumerate() {
            for b in router.pools.iter().skip(i + 1) {
                if a.asset == b.asset {
                    continue;
                }
                let edge = RouterEdge { router: router.address, ends: [(a.asset, a.pool), (b.asset, b.pool)] };
                let node_a = self.add_or_get_asset_idx(a.asset);
                let node_b = self.add_or_get_asset_idx(b.asset);

                match self.graph.find_edge(node_a, node_b) {
                    Some(edge_index) => {
                        if let Some(edges) = self.graph.edge_weight_mut(edge_index) {
                            edges.push(edge);
                        }
                    }
                    None => {
                        self.graph.add_edge(node_a, node_b, vec![edge]);
                    }
                }
            }
        }
    }

    pub fn asset_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Fewest-hops route from `from` to `to` using at most `max_hops` swaps. Among
    /// routers connecting the same two assets the first one added wins.
    pub fn find_route(&self, from: Address, to: Address, max_hops: usize) -> MirrorResult<Route> {
        let no_route = || MirrorError::NoRoute { from, to };

        if from == to {
            return Err(MirrorError::InvalidPath(format!("{} swaps into itself", from)));
        }
        let start = *self.asset_index.get(&from).ok_or_else(no_route)?;
        let end = *self.asset_index.get(&to).ok_or_else(no_route)?;

        // breadth first, so the first time `end` is reached it is by a shortest path
        let mut previous: HashMap<NodeIndex<usize>, NodeIndex<usize>> = HashMap::new();
        let mut queue = VecDeque::from([(start, 0usize)]);
        previous.insert(start, start);

        while let Some((node, hops)) = queue.pop_front() {
            if node == end {
                break;
            }
            if hops == max_hops {
                continue;
            }
            for next in self.graph.neighbors(node) {
                if let std::collections::hash_map::Entry::Vacant(entry) = previous.entry(next) {
                    entry.insert(node);
                    queue.push_back((next, hops + 1));
                }
            }
        }

        if !previous.contains_key(&end) {
            return Err(no_route());
        }

        let mut nodes = vec![end];
        let mut current = end;
        while current != start {
            current = previous[&current];
            nodes.push(current);
        }
        nodes.reverse();

        let mut hops = Vec::with_capacity(nodes.len() - 1);
        for pair in nodes.windows(2) {
            hops.push(self.hop(pair[0], pair[1]).ok_or_else(no_route)?);
        }
        Ok(Route { hops })
    }

    fn hop(&self, from: NodeIndex<usize>, to: NodeIndex<usize>) -> Option<Hop> {
        let asset_in = *self.graph.node_weight(from)?;
        let asset_out = *self.graph.node_weight(to)?;
        let edge = self.graph.find_edge(from, to).and_then(|idx| self.graph.edge_weight(idx))?.first()?;

        Some(Hop { router: edge.router, asset_in, asset_out, pool_in: edge.pool_of(asset_in)?, pool_out: edge.pool_of(asset_out)? })
    }
}

//! Static connectivity graphs for simulated deployments.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use drand_tdma_core::{LinkAddr, SlotIndex};
use rand::Rng;

/// Address of the `index`-th simulated node. Addresses start at `0.1`.
pub fn node_addr(index: usize) -> LinkAddr {
    LinkAddr::from((index + 1) as u16)
}

/// Undirected radio-range graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<LinkAddr>,
    adjacency: BTreeMap<LinkAddr, BTreeSet<LinkAddr>>,
}

impl Topology {
    pub fn with_nodes(count: usize) -> Self {
        let nodes: Vec<_> = (0..count).map(node_addr).collect();
        let adjacency = nodes.iter().map(|n| (*n, BTreeSet::new())).collect();
        Self { nodes, adjacency }
    }

    pub fn connect(&mut self, a: LinkAddr, b: LinkAddr) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Chain: each node hears only its predecessor and successor.
    pub fn line(count: usize) -> Self {
        let mut topo = Self::with_nodes(count);
        for i in 1..count {
            topo.connect(node_addr(i - 1), node_addr(i));
        }
        topo
    }

    /// 4-neighbor grid, row-major.
    pub fn grid(width: usize, height: usize) -> Self {
        let mut topo = Self::with_nodes(width * height);
        for y in 0..height {
            for x in 0..width {
                let here = node_addr(y * width + x);
                if x + 1 < width {
                    topo.connect(here, node_addr(y * width + x + 1));
                }
                if y + 1 < height {
                    topo.connect(here, node_addr((y + 1) * width + x));
                }
            }
        }
        topo
    }

    /// First node is the hub; every spoke is two hops from every other spoke.
    pub fn star(count: usize) -> Self {
        let mut topo = Self::with_nodes(count);
        for i in 1..count {
            topo.connect(node_addr(0), node_addr(i));
        }
        topo
    }

    pub fn fully_connected(count: usize) -> Self {
        let mut topo = Self::with_nodes(count);
        for i in 0..count {
            for j in i + 1..count {
                topo.connect(node_addr(i), node_addr(j));
            }
        }
        topo
    }

    /// Nodes dropped uniformly into the unit square, linked when within `radius`.
    pub fn random_geometric<R: Rng + ?Sized>(count: usize, radius: f64, rng: &mut R) -> Self {
        let mut topo = Self::with_nodes(count);
        let points: Vec<(f64, f64)> = (0..count).map(|_| (rng.random(), rng.random())).collect();
        for i in 0..count {
            for j in i + 1..count {
                let (dx, dy) = (points[i].0 - points[j].0, points[i].1 - points[j].1);
                if (dx * dx + dy * dy).sqrt() <= radius {
                    topo.connect(node_addr(i), node_addr(j));
                }
            }
        }
        topo
    }

    pub fn nodes(&self) -> &[LinkAddr] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = (LinkAddr, LinkAddr)> + '_ {
        self.adjacency
            .iter()
            .flat_map(|(a, ns)| ns.iter().filter(move |b| a < *b).map(move |b| (*a, *b)))
    }

    pub fn neighbors(&self, addr: LinkAddr) -> impl Iterator<Item = LinkAddr> + '_ {
        self.adjacency.get(&addr).into_iter().flatten().copied()
    }

    pub fn max_degree(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).max().unwrap_or(0)
    }

    pub fn within_two_hops(&self, a: LinkAddr, b: LinkAddr) -> bool {
        if a == b {
            return false;
        }
        self.neighbors(a).any(|n| n == b || self.neighbors(n).any(|m| m == b))
    }

    /// Pairs of nodes within two hops of each other that hold the same slot.
    pub fn slot_conflicts(&self, slots: &HashMap<LinkAddr, SlotIndex>) -> Vec<(LinkAddr, LinkAddr)> {
        let mut conflicts = Vec::new();
        for (i, a) in self.nodes.iter().enumerate() {
            for b in &self.nodes[i + 1..] {
                let same = matches!((slots.get(a), slots.get(b)), (Some(x), Some(y)) if x == y);
                if same && self.within_two_hops(*a, *b) {
                    conflicts.push((*a, *b));
                }
            }
        }
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_line_and_two_hop_reach() {
        let topo = Topology::line(4);
        assert_eq!(topo.edges().count(), 3);
        assert!(topo.within_two_hops(node_addr(0), node_addr(2)));
        assert!(!topo.within_two_hops(node_addr(0), node_addr(3)));
        assert!(!topo.within_two_hops(node_addr(1), node_addr(1)));
    }

    #[test]
    fn test_grid_and_star_shapes() {
        let grid = Topology::grid(3, 3);
        assert_eq!(grid.len(), 9);
        assert_eq!(grid.edges().count(), 12);
        assert_eq!(grid.neighbors(node_addr(4)).count(), 4);

        let star = Topology::star(5);
        assert_eq!(star.max_degree(), 4);
        assert!(star.within_two_hops(node_addr(1), node_addr(4)));
    }

    #[test]
    fn test_random_geometric_is_reproducible() {
        let a = Topology::random_geometric(12, 0.4, &mut StdRng::seed_from_u64(3));
        let b = Topology::random_geometric(12, 0.4, &mut StdRng::seed_from_u64(3));
        assert_eq!(a.edges().collect::<Vec<_>>(), b.edges().collect::<Vec<_>>());

        let full = Topology::random_geometric(6, 2.0, &mut StdRng::seed_from_u64(3));
        assert_eq!(full.edges().count(), Topology::fully_connected(6).edges().count());
    }

    #[test]
    fn test_slot_conflicts() {
        let topo = Topology::line(4);
        let slots: HashMap<_, _> = [(node_addr(0), 0), (node_addr(1), 1), (node_addr(2), 0), (node_addr(3), 1)]
            .into_iter()
            .collect();
        assert_eq!(topo.slot_conflicts(&slots), vec![(node_addr(0), node_addr(2)), (node_addr(1), node_addr(3))]);

        let slots: HashMap<_, _> = [(node_addr(0), 0), (node_addr(1), 1), (node_addr(2), 2), (node_addr(3), 0)]
            .into_iter()
            .collect();
        assert!(topo.slot_conflicts(&slots).is_empty());
    }
}

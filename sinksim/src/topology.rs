//! Network topology and link properties.

use hashbrown::HashMap;
use sinktree::{Duration, LinkAddr};

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Signal strength in dBm, seen the same way from both ends.
    pub rssi: i16,
    /// Per-transmission loss probability (0.0 to 1.0).
    pub loss_rate: f64,
    /// Airtime plus propagation delay of one transmission.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -45,
            loss_rate: 0.0,
            delay: Duration::from_millis(5),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Radio connectivity between nodes. Links are bidirectional and symmetric.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(LinkAddr, LinkAddr), Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pair of nodes can hear each other.
    pub fn fully_connected(nodes: &[LinkAddr], link: &Link) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, link.clone());
            }
        }
        topo
    }

    /// Each node hears only its predecessor and successor.
    pub fn chain(nodes: &[LinkAddr], link: &Link) -> Self {
        let mut topo = Self::new();
        for pair in nodes.windows(2) {
            topo.add_link(pair[0], pair[1], link.clone());
        }
        topo
    }

    /// The first node is the hub; spokes hear only the hub.
    pub fn star(nodes: &[LinkAddr], link: &Link) -> Self {
        let mut topo = Self::new();
        if let Some((&hub, spokes)) = nodes.split_first() {
            for &spoke in spokes {
                topo.add_link(hub, spoke, link.clone());
            }
        }
        topo
    }

    /// Row-major grid `width` nodes wide; each node hears its four
    /// orthogonal neighbors.
    pub fn grid(nodes: &[LinkAddr], width: usize, link: &Link) -> Self {
        let mut topo = Self::new();
        let width = width.max(1);
        for (i, &a) in nodes.iter().enumerate() {
            if (i + 1) % width != 0 {
                if let Some(&right) = nodes.get(i + 1) {
                    topo.add_link(a, right, link.clone());
                }
            }
            if let Some(&below) = nodes.get(i + width) {
                topo.add_link(a, below, link.clone());
            }
        }
        topo
    }

    /// Add (or replace) the link between two nodes.
    pub fn add_link(&mut self, a: LinkAddr, b: LinkAddr, link: Link) {
        self.links.insert(canonical_pair(a, b), link);
    }

    pub fn remove_link(&mut self, a: LinkAddr, b: LinkAddr) -> Option<Link> {
        self.links.remove(&canonical_pair(a, b))
    }

    pub fn get_link(&self, a: LinkAddr, b: LinkAddr) -> Option<&Link> {
        self.links.get(&canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: LinkAddr, b: LinkAddr) -> Option<&mut Link> {
        self.links.get_mut(&canonical_pair(a, b))
    }

    /// True if a link exists and is active.
    pub fn is_connected(&self, a: LinkAddr, b: LinkAddr) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable over active links, sorted by address.
    pub fn neighbors(&self, node: LinkAddr) -> Vec<LinkAddr> {
        let mut result: Vec<LinkAddr> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        // HashMap order is not stable across runs.
        result.sort();
        result
    }

    /// Disable all links crossing between partition groups.
    pub fn partition(&mut self, groups: &[Vec<LinkAddr>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

fn canonical_pair(a: LinkAddr, b: LinkAddr) -> (LinkAddr, LinkAddr) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nodes(count: usize) -> Vec<LinkAddr> {
        (0..count).map(|i| LinkAddr::new(i as u8 + 1, 0)).collect()
    }

    #[test]
    fn test_fully_connected() {
        let nodes = make_nodes(3);
        let topo = Topology::fully_connected(&nodes, &Link::default());

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[0], nodes[2]));
        assert!(topo.is_connected(nodes[2], nodes[1]));
        assert_eq!(topo.link_count(), 3);
    }

    #[test]
    fn test_chain() {
        let nodes = make_nodes(4);
        let topo = Topology::chain(&nodes, &Link::default());

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[1], nodes[2]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(!topo.is_connected(nodes[0], nodes[3]));
    }

    #[test]
    fn test_star() {
        let nodes = make_nodes(4);
        let topo = Topology::star(&nodes, &Link::default());

        assert_eq!(topo.neighbors(nodes[0]), &nodes[1..]);
        assert_eq!(topo.neighbors(nodes[2]), [nodes[0]]);
    }

    #[test]
    fn test_grid() {
        // 0 1 2
        // 3 4 5
        let nodes = make_nodes(6);
        let topo = Topology::grid(&nodes, 3, &Link::default());

        assert_eq!(topo.neighbors(nodes[0]), [nodes[1], nodes[3]]);
        assert_eq!(topo.neighbors(nodes[4]), [nodes[1], nodes[3], nodes[5]]);
        assert!(!topo.is_connected(nodes[2], nodes[3]));
        assert_eq!(topo.link_count(), 7);
    }

    #[test]
    fn test_partition_and_heal() {
        let nodes = make_nodes(4);
        let mut topo = Topology::fully_connected(&nodes, &Link::default());

        topo.partition(&[vec![nodes[0], nodes[1]], vec![nodes[2], nodes[3]]]);
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(!topo.is_connected(nodes[1], nodes[3]));

        topo.heal();
        assert!(topo.is_connected(nodes[0], nodes[2]));
    }

    #[test]
    fn test_link_lookup_is_symmetric() {
        let nodes = make_nodes(2);
        let mut topo = Topology::new();
        topo.add_link(nodes[1], nodes[0], Link::new().with_rssi(-60));

        assert_eq!(topo.get_link(nodes[0], nodes[1]).map(|l| l.rssi), Some(-60));
        topo.get_link_mut(nodes[0], nodes[1]).unwrap().active = false;
        assert!(!topo.is_connected(nodes[1], nodes[0]));
        assert!(topo.neighbors(nodes[0]).is_empty());
    }

    #[test]
    fn test_link_removal_and_loss() {
        let nodes = make_nodes(3);
        let mut topo = Topology::chain(&nodes, &Link::default());
        topo.add_link(nodes[0], nodes[2], Link::new().with_active(false));
        assert!(!topo.is_connected(nodes[0], nodes[2]));

        topo.set_global_loss_rate(1.5);
        assert_eq!(topo.get_link(nodes[1], nodes[2]).unwrap().loss_rate, 1.0);

        assert!(topo.remove_link(nodes[1], nodes[0]).is_some());
        assert!(topo.remove_link(nodes[0], nodes[1]).is_none());
        assert_eq!(topo.link_count(), 2);
    }
}

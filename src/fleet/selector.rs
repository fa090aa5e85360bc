//! Node selection strategies.

use crate::fleet::snapshot::FleetSnapshot;
use crate::node::stats::{NodeState, NodeStats};

/// Picks a node for one new player.
///
/// Implementations must only return `Ready` nodes whose `load` is strictly
/// below `ceiling`. Selection reserves nothing; concurrent callers may get
/// the same node.
pub trait NodeSelector: Send + Sync {
    fn select<'a>(&self, snapshot: &'a FleetSnapshot, ceiling: f64) -> Option<&'a NodeStats>;
}

/// Lowest load first, ties broken by smallest node id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

/// Whether `node` may take a new player under `ceiling`.
pub fn is_eligible(node: &NodeStats, ceiling: f64) -> bool {
    // NaN loads fail the comparison and are never eligible.
    node.state == NodeState::Ready && node.load < ceiling
}

impl NodeSelector for LeastLoaded {
    fn select<'a>(&self, snapshot: &'a FleetSnapshot, ceiling: f64) -> Option<&'a NodeStats> {
        snapshot
            .nodes()
            .filter(|node| is_eligible(node, ceiling))
            .min_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.id.cmp(&b.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, state: NodeState, connections: i64) -> NodeStats {
        let mut stats = NodeStats::new(id, "127.0.0.1", 4000);
        stats.adjust(connections, 0.001).unwrap();
        stats.state = state;
        stats
    }

    #[test]
    fn picks_lowest_load() {
        let snapshot = FleetSnapshot::from_stats(vec![
            node("a", NodeState::Ready, 50),
            node("b", NodeState::Ready, 10),
            node("c", NodeState::Ready, 30),
        ]);
        assert_eq!(LeastLoaded.select(&snapshot, 0.9).unwrap().id, "b");
    }

    #[test]
    fn ties_go_to_smallest_id() {
        let snapshot = FleetSnapshot::from_stats(vec![
            node("zeta", NodeState::Ready, 5),
            node("alpha", NodeState::Ready, 5),
            node("mid", NodeState::Ready, 5),
        ]);
        assert_eq!(LeastLoaded.select(&snapshot, 0.9).unwrap().id, "alpha");
    }

    #[test]
    fn skips_idle_closed_and_saturated_nodes() {
        let snapshot = FleetSnapshot::from_stats(vec![
            node("idle", NodeState::Idle, 0),
            node("closed", NodeState::Closed, 0),
            node("full", NodeState::Ready, 900),
            node("ok", NodeState::Ready, 899),
        ]);
        assert_eq!(LeastLoaded.select(&snapshot, 0.9).unwrap().id, "ok");
    }

    #[test]
    fn load_equal_to_ceiling_is_not_eligible() {
        let mut at_ceiling = node("a", NodeState::Ready, 0);
        at_ceiling.load = 0.5;
        let snapshot = FleetSnapshot::from_stats(vec![at_ceiling]);
        assert!(LeastLoaded.select(&snapshot, 0.5).is_none());
    }

    #[test]
    fn nan_load_is_never_selected() {
        let mut broken = node("a", NodeState::Ready, 0);
        broken.load = f64::NAN;
        let snapshot = FleetSnapshot::from_stats(vec![broken, node("b", NodeState::Ready, 1)]);
        assert_eq!(LeastLoaded.select(&snapshot, 0.9).unwrap().id, "b");
    }

    #[test]
    fn result_always_respects_ceiling() {
        let nodes: Vec<_> = (0..40)
            .map(|i| node(&format!("n{:02}", i), NodeState::Ready, (i * 37) % 1000))
            .collect();
        let snapshot = FleetSnapshot::from_stats(nodes);
        for step in 0..=20 {
            let ceiling = step as f64 * 0.05;
            match LeastLoaded.select(&snapshot, ceiling) {
                Some(chosen) => {
                    assert!(chosen.load < ceiling);
                    assert!(snapshot
                        .nodes()
                        .filter(|n| is_eligible(n, ceiling))
                        .all(|n| n.load >= chosen.load));
                }
                None => assert!(snapshot.nodes().all(|n| !is_eligible(n, ceiling))),
            }
        }
    }
}

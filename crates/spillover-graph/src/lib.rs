//! Spillover Graph
//!
//! Contiguity graph over administrative units and the spatial-contagion
//! signal derived from it:
//!
//! - Queen (shared vertex) or rook (shared edge) contiguity
//! - Row-normalized adjacency weights
//! - Neighbor average of a per-unit signal; isolated units get 0
//!
//! Construction is a pure function of the registry geometry. Nodes follow
//! registry order and neighbors are visited in ascending index order, so
//! identical inputs give bit-identical outputs.

use admin_registry::UnitRegistry;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

pub mod contiguity;

pub use contiguity::{neighbor_pairs, ContiguityRule};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Unit not found: {0}")]
    NodeNotFound(String),
    #[error("Signal length {actual} does not match unit count {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// Adjacency between units, built once per run
pub struct ContiguityGraph {
    graph: UnGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
    /// Sorted neighbor lists, indexed like the registry
    neighbors: Vec<Vec<usize>>,
    rule: ContiguityRule,
}

impl ContiguityGraph {
    pub fn from_registry(registry: &UnitRegistry, rule: ContiguityRule) -> Self {
        let mut graph = UnGraph::with_capacity(registry.len(), 0);
        let mut node_index = HashMap::with_capacity(registry.len());
        for unit in registry.units() {
            let idx = graph.add_node(unit.unit_id.clone());
            node_index.insert(unit.unit_id.clone(), idx);
        }

        let mut neighbors = vec![Vec::new(); registry.len()];
        for (i, j) in neighbor_pairs(registry, rule) {
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), ());
            neighbors[i].push(j);
            neighbors[j].push(i);
        }
        for list in &mut neighbors {
            list.sort_unstable();
        }

        let built = Self {
            graph,
            node_index,
            neighbors,
            rule,
        };
        let stats = built.stats();
        info!(
            "Built {:?} contiguity graph: {} units, {} links, {} isolated",
            rule, stats.total_nodes, stats.total_links, stats.isolated_nodes
        );
        built
    }

    pub fn rule(&self) -> ContiguityRule {
        self.rule
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Neighbor unit ids in registry order
    pub fn neighbors_of(&self, unit_id: &str) -> Result<Vec<&str>> {
        let idx = self
            .node_index
            .get(unit_id)
            .ok_or_else(|| GraphError::NodeNotFound(unit_id.to_string()))?;
        Ok(self.neighbors[idx.index()]
            .iter()
            .map(|&j| self.graph[NodeIndex::new(j)].as_str())
            .collect())
    }

    /// Row of the row-normalized adjacency matrix: each neighbor weighs
    /// `1 / degree`; empty for an isolated unit.
    pub fn row_weights(&self, unit_id: &str) -> Result<Vec<(&str, f64)>> {
        let neighbors = self.neighbors_of(unit_id)?;
        let w = if neighbors.is_empty() {
            0.0
        } else {
            1.0 / neighbors.len() as f64
        };
        Ok(neighbors.into_iter().map(|n| (n, w)).collect())
    }

    /// Row-normalized neighbor average of `values` (indexed like the registry).
    pub fn spillover(&self, values: &[f64]) -> Result<Vec<f64>> {
        if values.len() != self.len() {
            return Err(GraphError::LengthMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }

        Ok(self
            .neighbors
            .iter()
            .map(|list| {
                if list.is_empty() {
                    return 0.0;
                }
                let w = 1.0 / list.len() as f64;
                list.iter().map(|&j| w * values[j]).sum()
            })
            .collect())
    }

    pub fn stats(&self) -> GraphStats {
        let degrees: Vec<usize> = self.neighbors.iter().map(Vec::len).collect();
        let total_nodes = degrees.len();
        GraphStats {
            total_nodes,
            total_links: self.graph.edge_count(),
            isolated_nodes: degrees.iter().filter(|&&d| d == 0).count(),
            max_degree: degrees.iter().copied().max().unwrap_or(0),
            mean_degree: if total_nodes == 0 {
                0.0
            } else {
                degrees.iter().sum::<usize>() as f64 / total_nodes as f64
            },
        }
    }
}

/// Graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_links: usize,
    pub isolated_nodes: usize,
    pub max_degree: usize,
    pub mean_degree: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use admin_registry::{AdministrativeUnit, MultiPolygon};
    use proptest::prelude::*;

    fn unit(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> AdministrativeUnit {
        AdministrativeUnit::new(id, "R", id, "R", MultiPolygon::rectangle(x0, y0, x1, y1))
    }

    /// U1 | U2 | U3 in a row, U4 touching U3 only at a corner, U5 far away
    fn create_test_registry() -> UnitRegistry {
        UnitRegistry::from_units(vec![
            unit("U1", 0.0, 0.0, 1.0, 1.0),
            unit("U2", 1.0, 0.0, 2.0, 1.0),
            unit("U3", 2.0, 0.0, 3.0, 1.0),
            unit("U4", 3.0, 1.0, 4.0, 2.0),
            unit("U5", 10.0, 10.0, 11.0, 11.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_queen_neighbors() {
        let graph = ContiguityGraph::from_registry(&create_test_registry(), ContiguityRule::Queen);
        assert_eq!(graph.neighbors_of("U1").unwrap(), vec!["U2"]);
        assert_eq!(graph.neighbors_of("U2").unwrap(), vec!["U1", "U3"]);
        assert_eq!(graph.neighbors_of("U3").unwrap(), vec!["U2", "U4"]);
        assert!(graph.neighbors_of("U5").unwrap().is_empty());

        let stats = graph.stats();
        assert_eq!(stats.total_links, 3);
        assert_eq!(stats.isolated_nodes, 1);
        assert_eq!(stats.max_degree, 2);
    }

    #[test]
    fn test_rook_excludes_corner_contact() {
        let graph = ContiguityGraph::from_registry(&create_test_registry(), ContiguityRule::Rook);
        assert_eq!(graph.neighbors_of("U3").unwrap(), vec!["U2"]);
        assert!(graph.neighbors_of("U4").unwrap().is_empty());
    }

    #[test]
    fn test_three_unit_spillover() {
        let registry = UnitRegistry::from_units(vec![
            unit("U1", 0.0, 0.0, 1.0, 1.0),
            unit("U2", 1.0, 0.0, 2.0, 1.0),
            unit("U3", 2.0, 0.0, 3.0, 1.0),
        ])
        .unwrap();
        let graph = ContiguityGraph::from_registry(&registry, ContiguityRule::Queen);
        let s = graph.spillover(&[100.0, 0.0, 0.0]).unwrap();
        assert_eq!(s, vec![0.0, 50.0, 0.0]);
    }

    #[test]
    fn test_isolated_unit_is_zero() {
        let graph = ContiguityGraph::from_registry(&create_test_registry(), ContiguityRule::Queen);
        let s = graph.spillover(&[1.0, 2.0, 3.0, 4.0, 1000.0]).unwrap();
        assert_eq!(s[4], 0.0);
        assert!(graph.row_weights("U5").unwrap().is_empty());
    }

    #[test]
    fn test_length_mismatch() {
        let graph = ContiguityGraph::from_registry(&create_test_registry(), ContiguityRule::Queen);
        assert!(matches!(
            graph.spillover(&[1.0]),
            Err(GraphError::LengthMismatch { expected: 5, actual: 1 })
        ));
        assert!(matches!(graph.neighbors_of("nope"), Err(GraphError::NodeNotFound(_))));
    }

    #[test]
    fn test_rule_from_str() {
        assert_eq!("Queen".parse::<ContiguityRule>().unwrap(), ContiguityRule::Queen);
        assert_eq!("rook".parse::<ContiguityRule>().unwrap(), ContiguityRule::Rook);
        assert!("bishop".parse::<ContiguityRule>().is_err());
    }

    proptest! {
        #[test]
        fn prop_row_weights_sum_to_one(cols in 1usize..6, rows in 1usize..6) {
            let mut units = Vec::new();
            for r in 0..rows {
                for c in 0..cols {
                    let (x, y) = (c as f64, r as f64);
                    units.push(unit(&format!("G{}_{}", r, c), x, y, x + 1.0, y + 1.0));
                }
            }
            let registry = UnitRegistry::from_units(units).unwrap();
            let graph = ContiguityGraph::from_registry(&registry, ContiguityRule::Queen);
            for u in registry.units() {
                let row = graph.row_weights(&u.unit_id).unwrap();
                if !row.is_empty() {
                    let total: f64 = row.iter().map(|(_, w)| w).sum();
                    prop_assert!((total - 1.0).abs() < 1e-12);
                }
            }
        }

        #[test]
        fn prop_spillover_is_deterministic(values in proptest::collection::vec(0.0f64..1e4, 5)) {
            let registry = create_test_registry();
            let a = ContiguityGraph::from_registry(&registry, ContiguityRule::Queen).spillover(&values).unwrap();
            let b = ContiguityGraph::from_registry(&registry, ContiguityRule::Queen).spillover(&values).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}

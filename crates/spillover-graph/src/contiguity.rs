//! Shared-boundary detection between unit geometries

use admin_registry::{Coord, UnitRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Vertices closer than this (degrees) are treated as the same point
pub const VERTEX_QUANTUM: f64 = 1e-9;

/// Which shared boundary makes two units neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContiguityRule {
    /// At least one common vertex
    #[default]
    Queen,
    /// At least one common edge
    Rook,
}

impl std::str::FromStr for ContiguityRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queen" => Ok(ContiguityRule::Queen),
            "rook" => Ok(ContiguityRule::Rook),
            other => Err(format!("unknown contiguity rule '{}'", other)),
        }
    }
}

type VertexKey = (i64, i64);

fn vertex_key(c: Coord) -> VertexKey {
    (
        (c.x / VERTEX_QUANTUM).round() as i64,
        (c.y / VERTEX_QUANTUM).round() as i64,
    )
}

fn edge_key(a: VertexKey, b: VertexKey) -> (VertexKey, VertexKey) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Unordered neighbor pairs `(i, j)` with `i < j`, as registry indices.
///
/// Returned sorted, so graph construction is independent of hash order.
pub fn neighbor_pairs(registry: &UnitRegistry, rule: ContiguityRule) -> BTreeSet<(usize, usize)> {
    let mut owners: HashMap<(VertexKey, VertexKey), BTreeSet<usize>> = HashMap::new();

    for (idx, unit) in registry.units().iter().enumerate() {
        for poly in unit.geometry.polygons() {
            for ring in poly.rings() {
                for w in ring.windows(2) {
                    let (a, b) = (vertex_key(w[0]), vertex_key(w[1]));
                    let key = match rule {
                        ContiguityRule::Queen => (a, a),
                        ContiguityRule::Rook => edge_key(a, b),
                    };
                    owners.entry(key).or_default().insert(idx);
                }
            }
        }
    }

    let mut pairs = BTreeSet::new();
    for units in owners.values().filter(|s| s.len() > 1) {
        let units: Vec<usize> = units.iter().copied().collect();
        for (k, &i) in units.iter().enumerate() {
            for &j in &units[k + 1..] {
                pairs.insert((i, j));
            }
        }
    }
    pairs
}

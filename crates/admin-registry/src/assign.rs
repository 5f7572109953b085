//! Spatial assignment of point records to administrative units

use crate::geometry::{Coord, Location};
use crate::UnitRegistry;
use tracing::{debug, info};

/// Point-in-polygon rule used for a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Strictly inside (facility assignment)
    Within,
    /// Inside or on the boundary (event assignment)
    Intersects,
}

impl Predicate {
    pub fn accepts(&self, location: Location) -> bool {
        match self {
            Predicate::Within => location == Location::Interior,
            Predicate::Intersects => location != Location::Exterior,
        }
    }
}

/// Anything carrying an optional lon/lat position
pub trait Located {
    /// `(longitude, latitude)` if both are present and numeric
    fn position(&self) -> Option<(f64, f64)>;
}

/// A record joined to its unit; `unit_id` stays `None` outside every polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Assigned<T> {
    pub record: T,
    pub unit_id: Option<String>,
    pub unit_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Assignment<T> {
    pub assigned: Vec<Assigned<T>>,
    /// Records dropped for missing or out-of-range coordinates
    pub dropped: usize,
}

impl<T> Assignment<T> {
    pub fn matched(&self) -> impl Iterator<Item = &Assigned<T>> {
        self.assigned.iter().filter(|a| a.unit_id.is_some())
    }

    pub fn unmatched_count(&self) -> usize {
        self.assigned.iter().filter(|a| a.unit_id.is_none()).count()
    }
}

fn is_valid_latitude(lat: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && lat.is_finite()
}

fn is_valid_longitude(lon: f64) -> bool {
    (-180.0..=180.0).contains(&lon) && lon.is_finite()
}

/// Join every record to the first unit whose polygon satisfies `predicate`.
pub fn assign_points<T: Located>(
    records: Vec<T>,
    registry: &UnitRegistry,
    predicate: Predicate,
) -> Assignment<T> {
    let mut assigned = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        let (lon, lat) = match record.position() {
            Some((lon, lat)) if is_valid_longitude(lon) && is_valid_latitude(lat) => (lon, lat),
            _ => {
                dropped += 1;
                continue;
            }
        };

        let unit = registry.locate(Coord::new(lon, lat), predicate);
        if unit.is_none() {
            debug!("Point ({:.5}, {:.5}) falls outside every unit", lon, lat);
        }
        assigned.push(Assigned {
            record,
            unit_id: unit.map(|u| u.unit_id.clone()),
            unit_name: unit.map(|u| u.unit_name.clone()),
        });
    }

    let result = Assignment { assigned, dropped };
    info!(
        "Assigned {} points ({:?}): {} matched, {} outside all units, {} dropped for coordinates",
        result.assigned.len(),
        predicate,
        result.assigned.len() - result.unmatched_count(),
        result.unmatched_count(),
        dropped
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::square_unit;

    #[derive(Debug, Clone, PartialEq)]
    struct Pt(Option<f64>, Option<f64>);

    impl Located for Pt {
        fn position(&self) -> Option<(f64, f64)> {
            Some((self.0?, self.1?))
        }
    }

    fn registry() -> UnitRegistry {
        UnitRegistry::from_units(vec![
            square_unit("U1", "A", 0.0, 0.0, 1.0),
            square_unit("U2", "A", 1.0, 0.0, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_coordinates_are_dropped() {
        let points = vec![Pt(None, Some(0.5)), Pt(Some(0.5), None), Pt(Some(0.5), Some(0.5))];
        let result = assign_points(points, &registry(), Predicate::Intersects);
        assert_eq!(result.dropped, 2);
        assert_eq!(result.assigned.len(), 1);
        assert_eq!(result.assigned[0].unit_id.as_deref(), Some("U1"));
    }

    #[test]
    fn test_out_of_range_coordinates_are_dropped() {
        let points = vec![Pt(Some(200.0), Some(0.5)), Pt(Some(0.5), Some(f64::NAN))];
        let result = assign_points(points, &registry(), Predicate::Intersects);
        assert_eq!(result.dropped, 2);
        assert!(result.assigned.is_empty());
    }

    #[test]
    fn test_unmatched_points_are_kept_without_unit() {
        let points = vec![Pt(Some(5.0), Some(5.0))];
        let result = assign_points(points, &registry(), Predicate::Intersects);
        assert_eq!(result.assigned.len(), 1);
        assert_eq!(result.unmatched_count(), 1);
        assert_eq!(result.matched().count(), 0);
    }

    #[test]
    fn test_border_point_counts_for_events_not_facilities() {
        let border = vec![Pt(Some(1.0), Some(0.25))];
        let events = assign_points(border.clone(), &registry(), Predicate::Intersects);
        assert_eq!(events.assigned[0].unit_id.as_deref(), Some("U1"));

        let facilities = assign_points(border, &registry(), Predicate::Within);
        assert_eq!(facilities.assigned[0].unit_id, None);
    }
}

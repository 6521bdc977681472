//! Containment and zone grouping.
//!
//! Containment uses the zone's axis-aligned extent and ignores the zone's
//! own rotation.  Rotated zones therefore over- or under-include items
//! near their corners.

use std::collections::VecDeque;

use crate::bounds::{Bounds, Footprint};

/// Whether the item's center lies inside the zone's unrotated extent.
/// Points on the boundary are inside.
#[inline]
pub fn contains<I: Footprint, Z: Footprint>(item: &I, zone: &Z) -> bool {
    Bounds::of(zone.footprint()).contains(item.center())
}

/// Index of the first zone containing the item.
pub fn containing_zone<I: Footprint, Z: Footprint>(item: &I, zones: &[Z]) -> Option<usize> {
    zones.iter().position(|zone| contains(item, zone))
}

/// Cluster zones whose centers lie within `threshold` meters of each other.
///
/// Builds an undirected graph with an edge between every pair of zones
/// closer than the threshold (inclusive) and returns its connected
/// components as indices into `zones`.  Components are ordered by their
/// lowest index and each component is sorted ascending.
pub fn group_zones<Z: Footprint>(zones: &[Z], threshold: f64) -> Vec<Vec<usize>> {
    let threshold = if threshold.is_finite() { threshold.max(0.0) } else { 0.0 };
    let centers: Vec<_> = zones.iter().map(Footprint::center).collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); zones.len()];
    for a in 0..centers.len() {
        for b in (a + 1)..centers.len() {
            if centers[a].distance(&centers[b]) <= threshold {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        }
    }

    let mut visited = vec![false; zones.len()];
    let mut groups = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..zones.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let mut group = Vec::new();
        while let Some(current) = queue.pop_front() {
            group.push(current);
            for &next in &adjacency[current] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        group.sort_unstable();
        groups.push(group);
    }

    log::debug!("Grouped {} zones into {} groups", zones.len(), groups.len());
    groups
}

//! Export page planning.
//!
//! Turns a deck into an ordered list of pages (overview, one page per zone
//! group, then items outside every zone) with everything the page renderer
//! needs already computed.  Drawing and typography happen elsewhere.

use rustc_hash::FxHashSet;
use serde::Serialize;
use thiserror::Error;

use riglog_core::model::{Deck, ItemPlacement, ZonePlacement};

use crate::bounds::{compute_bounds, Bounds, Footprint};
use crate::shape::{item_outline, ShapeOutline};
use crate::spatial::{contains, group_zones};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),
}

/// Export page options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Zones whose centers are within this many meters share a page.
    pub group_threshold: f64,
    /// Padding around each page's content, in meters.
    pub margin: f64,
    /// Export a planning scenario's items instead of the deck layout's.
    pub scenario: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            group_threshold: 20.0,
            margin: 1.0,
            scenario: None,
        }
    }
}

impl ExportOptions {
    pub fn for_testing() -> Self {
        Self {
            group_threshold: 5.0,
            margin: 0.0,
            scenario: None,
        }
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PageKind {
    Overview,
    ZoneGroup { zones: Vec<usize> },
    Unzoned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportZone {
    pub label: String,
    pub name_hidden: bool,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportItem {
    pub id: String,
    pub label: String,
    pub color: String,
    pub under_layer: bool,
    pub outline: ShapeOutline,
}

impl ExportItem {
    fn from_item(item: &ItemPlacement) -> Self {
        Self {
            id: item.id.clone(),
            label: item.base.label.clone(),
            color: item.color.clone(),
            under_layer: item.under_layer,
            outline: item_outline(item),
        }
    }
}

/// One printable page.  `bounds` is the page viewport in meters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPage {
    pub title: String,
    pub kind: PageKind,
    pub bounds: Bounds,
    pub zones: Vec<ExportZone>,
    /// Items in draw order: under-layer items first.
    pub items: Vec<ExportItem>,
}

fn pad(bounds: Bounds, margin: f64) -> Bounds {
    let margin = if margin.is_finite() { margin.max(0.0) } else { 0.0 };
    Bounds {
        min_x: bounds.min_x - margin,
        min_y: bounds.min_y - margin,
        max_x: bounds.max_x + margin,
        max_y: bounds.max_y + margin,
    }
}

fn page(
    title: String,
    kind: PageKind,
    zones: &[&ZonePlacement],
    items: &[&ItemPlacement],
    margin: f64,
) -> ExportPage {
    let footprints = zones
        .iter()
        .map(|zone| zone.footprint())
        .chain(items.iter().map(|item| item.footprint()));
    let bounds = pad(compute_bounds(footprints), margin);

    let mut ordered: Vec<&ItemPlacement> = items.to_vec();
    ordered.sort_by_key(|item| !item.under_layer);

    ExportPage {
        title,
        kind,
        bounds,
        zones: zones
            .iter()
            .map(|zone| ExportZone {
                label: zone.base.label.clone(),
                name_hidden: zone.name_hidden,
                bounds: Bounds::of(&zone.base),
            })
            .collect(),
        items: ordered.into_iter().map(ExportItem::from_item).collect(),
    }
}

/// Plan the export pages for a deck.
pub fn plan_export(deck: &Deck, options: &ExportOptions) -> Result<Vec<ExportPage>, ExportError> {
    let items: Vec<&ItemPlacement> = match &options.scenario {
        Some(id) => deck
            .scenario(id)
            .ok_or_else(|| ExportError::ScenarioNotFound(id.clone()))?
            .items
            .iter()
            .collect(),
        None => deck.items().collect(),
    };
    let zones: Vec<&ZonePlacement> = deck.zones().collect();

    let mut pages = vec![page(
        deck.name.clone(),
        PageKind::Overview,
        &zones,
        &items,
        options.margin,
    )];

    let mut zoned: FxHashSet<&str> = FxHashSet::default();
    for group in group_zones(&zones, options.group_threshold) {
        let members: Vec<&ZonePlacement> = group.iter().map(|&index| zones[index]).collect();
        let group_items: Vec<&ItemPlacement> = items
            .iter()
            .copied()
            .filter(|item| members.iter().any(|zone| contains(item, zone)))
            .collect();
        zoned.extend(group_items.iter().map(|item| item.id.as_str()));

        let title = members
            .iter()
            .map(|zone| zone.base.label.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        pages.push(page(
            title,
            PageKind::ZoneGroup { zones: group },
            &members,
            &group_items,
            options.margin,
        ));
    }

    let unzoned: Vec<&ItemPlacement> = items
        .iter()
        .copied()
        .filter(|item| !zoned.contains(item.id.as_str()))
        .collect();
    if !unzoned.is_empty() {
        pages.push(page(
            "Unzoned items".to_string(),
            PageKind::Unzoned,
            &[],
            &unzoned,
            options.margin,
        ));
    }

    log::debug!("Planned {} export pages for deck {}", pages.len(), deck.id);
    Ok(pages)
}

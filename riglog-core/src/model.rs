//! Deck layout document model.
//!
//! The same types back the ledger's persisted document, the wire payloads
//! and each editor's in-memory state.  They only derive `Serialize`: every
//! inbound path goes through [`StateEnvelope::from_value`] so that
//! malformed data is normalized instead of rejected.
//!
//! ```text
//! StateEnvelope { version, decks, mutationTimestamp }
//!   └── Deck { id, name, layout, scenarios, updatedAt }
//!         ├── Placement::Item  (id, shape, history, attachments …)
//!         ├── Placement::Zone  ("deck-area", no id)
//!         └── PlanningScenario { id, label, items }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const DEFAULT_WIDTH_M: f64 = 5.0;
pub const DEFAULT_HEIGHT_M: f64 = 3.0;
/// Smallest width/height a placement may have, in meters.
pub const MIN_DIMENSION_M: f64 = 0.5;
/// Item history keeps this many records, newest first.
pub const HISTORY_CAP: usize = 50;

pub const DEFAULT_ITEM_COLOR: &str = "#3a7afe";
pub const DEFAULT_ITEM_LABEL: &str = "Item";
pub const DEFAULT_ZONE_LABEL: &str = "Deck area";
pub const DEFAULT_DECK_NAME: &str = "Deck";
pub const DEFAULT_SCENARIO_LABEL: &str = "Planning deck";
pub const DEFAULT_ATTACHMENT_NAME: &str = "Attachment";

/// Decks a fresh ledger starts with.
pub const DEFAULT_DECK_NAMES: [&str; 3] =
    ["Statfjord A deck", "Statfjord B deck", "Statfjord C deck"];

/// Mint a string id of the form `<prefix>-<uuid>`.
pub fn mint_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Normalize an angle in degrees to the half-open range (-180, 180].
///
/// Values already in range are returned untouched so that normalizing
/// twice never drifts through floating point rounding.
pub fn normalize_rotation(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    if degrees > -180.0 && degrees <= 180.0 {
        return degrees;
    }
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Coerce a dimension to a finite value at or above [`MIN_DIMENSION_M`].
pub fn clamp_dimension(meters: f64, fallback: f64) -> f64 {
    let value = if meters.is_finite() { meters } else { fallback };
    value.max(MIN_DIMENSION_M)
}

// ───────────────────────────────────────────────────────────────────
// Placements
// ───────────────────────────────────────────────────────────────────

/// Supported item outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    #[default]
    Rectangle,
    Circle,
    RightTriangle,
    EquilateralTriangle,
}

impl Shape {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rectangle" | "rect" => Some(Self::Rectangle),
            "circle" | "ellipse" => Some(Self::Circle),
            "right-triangle" => Some(Self::RightTriangle),
            "equilateral-triangle" | "triangle" => Some(Self::EquilateralTriangle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Circle => "circle",
            Self::RightTriangle => "right-triangle",
            Self::EquilateralTriangle => "equilateral-triangle",
        }
    }
}

/// Fields shared by items and zones.
///
/// `x`/`y` are the top-left corner in workspace units; `width`/`height`
/// are real-world meters.  `rotation` turns the placement about its own
/// center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementBase {
    pub label: String,
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub locked: bool,
}

impl PlacementBase {
    pub fn new(label: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            label: label.into(),
            width: clamp_dimension(width, DEFAULT_WIDTH_M),
            height: clamp_dimension(height, DEFAULT_HEIGHT_M),
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            locked: false,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = if x.is_finite() { x } else { 0.0 };
        self.y = if y.is_finite() { y } else { 0.0 };
        self
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        if dx.is_finite() {
            self.x += dx;
        }
        if dy.is_finite() {
            self.y += dy;
        }
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = clamp_dimension(width, self.width);
        self.height = clamp_dimension(height, self.height);
    }

    pub fn rotate_by(&mut self, degrees: f64) {
        if degrees.is_finite() {
            self.rotation = normalize_rotation(self.rotation + degrees);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "name")]
    pub filename: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub size: u64,
    #[serde(rename = "dataUrl")]
    pub content_ref: String,
    pub added_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
        content_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: mint_id("attachment"),
            filename: filename.into(),
            media_type: media_type.into(),
            size,
            content_ref: content_ref.into(),
            added_at: now,
        }
    }
}

/// Immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPlacement {
    pub id: String,
    #[serde(flatten)]
    pub base: PlacementBase,
    pub color: String,
    pub shape: Shape,
    pub under_layer: bool,
    pub comment: String,
    pub attachments: Vec<Attachment>,
    pub history: Vec<HistoryRecord>,
    pub last_modified: DateTime<Utc>,
}

impl ItemPlacement {
    pub fn new(base: PlacementBase, now: DateTime<Utc>) -> Self {
        Self {
            id: mint_id("item"),
            base,
            color: DEFAULT_ITEM_COLOR.to_string(),
            shape: Shape::default(),
            under_layer: false,
            comment: String::new(),
            attachments: Vec::new(),
            history: Vec::new(),
            last_modified: now,
        }
    }

    /// Prepend a history record, dropping the oldest past [`HISTORY_CAP`].
    pub fn record(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.history.insert(
            0,
            HistoryRecord {
                message: message.into(),
                timestamp: now,
            },
        );
        self.history.truncate(HISTORY_CAP);
        self.last_modified = now;
    }
}

/// Rectangular deck area used for grouping and containment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonePlacement {
    #[serde(flatten)]
    pub base: PlacementBase,
    pub name_hidden: bool,
}

impl ZonePlacement {
    pub fn new(base: PlacementBase) -> Self {
        Self {
            base,
            name_hidden: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Placement {
    #[serde(rename = "item")]
    Item(ItemPlacement),
    #[serde(rename = "deck-area")]
    Zone(ZonePlacement),
}

impl Placement {
    pub fn base(&self) -> &PlacementBase {
        match self {
            Placement::Item(item) => &item.base,
            Placement::Zone(zone) => &zone.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut PlacementBase {
        match self {
            Placement::Item(item) => &mut item.base,
            Placement::Zone(zone) => &mut zone.base,
        }
    }

    pub fn as_item(&self) -> Option<&ItemPlacement> {
        match self {
            Placement::Item(item) => Some(item),
            Placement::Zone(_) => None,
        }
    }

    pub fn as_zone(&self) -> Option<&ZonePlacement> {
        match self {
            Placement::Zone(zone) => Some(zone),
            Placement::Item(_) => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Decks and scenarios
// ───────────────────────────────────────────────────────────────────

/// Alternate item-only layout for a deck.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningScenario {
    pub id: String,
    pub label: String,
    #[serde(serialize_with = "tagged_items")]
    pub items: Vec<ItemPlacement>,
}

/// Scenario items carry the same `type` tag as layout items.
#[derive(Serialize)]
#[serde(tag = "type")]
enum TaggedItem<'a> {
    #[serde(rename = "item")]
    Item(&'a ItemPlacement),
}

fn tagged_items<S: serde::Serializer>(items: &[ItemPlacement], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(items.iter().map(TaggedItem::Item))
}

impl PlanningScenario {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: mint_id("plan"),
            label: label.into(),
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: String,
    pub name: String,
    pub layout: Vec<Placement>,
    pub scenarios: Vec<PlanningScenario>,
    pub updated_at: DateTime<Utc>,
}

impl Deck {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: mint_id("deck"),
            name: name.into(),
            layout: Vec::new(),
            scenarios: Vec::new(),
            updated_at: now,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemPlacement> {
        self.layout.iter().filter_map(Placement::as_item)
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZonePlacement> {
        self.layout.iter().filter_map(Placement::as_zone)
    }

    pub fn item(&self, id: &str) -> Option<&ItemPlacement> {
        self.items().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut ItemPlacement> {
        self.layout.iter_mut().find_map(|entry| match entry {
            Placement::Item(item) if item.id == id => Some(item),
            _ => None,
        })
    }

    /// Layout position of the `index`-th zone.  Zones carry no id, so they
    /// are addressed by their order among the deck's zones.
    pub fn zone_position(&self, index: usize) -> Option<usize> {
        self.layout
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry, Placement::Zone(_)))
            .nth(index)
            .map(|(position, _)| position)
    }

    pub fn zone_mut(&mut self, index: usize) -> Option<&mut ZonePlacement> {
        let position = self.zone_position(index)?;
        match &mut self.layout[position] {
            Placement::Zone(zone) => Some(zone),
            Placement::Item(_) => None,
        }
    }

    pub fn scenario(&self, id: &str) -> Option<&PlanningScenario> {
        self.scenarios.iter().find(|scenario| scenario.id == id)
    }

    pub fn scenario_mut(&mut self, id: &str) -> Option<&mut PlanningScenario> {
        self.scenarios.iter_mut().find(|scenario| scenario.id == id)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// The unit of synchronization.  Only the ledger assigns `version`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnvelope {
    pub version: u64,
    pub decks: Vec<Deck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_timestamp: Option<DateTime<Utc>>,
}

impl StateEnvelope {
    pub fn new(version: u64, decks: Vec<Deck>) -> Self {
        Self {
            version,
            decks,
            mutation_timestamp: None,
        }
    }

    /// Envelope holding the default decks.
    pub fn with_default_decks(version: u64, now: DateTime<Utc>) -> Self {
        let decks = DEFAULT_DECK_NAMES
            .iter()
            .map(|name| Deck::new(*name, now))
            .collect();
        Self::new(version, decks)
    }

    pub fn deck(&self, id: &str) -> Option<&Deck> {
        self.decks.iter().find(|deck| deck.id == id)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Parse and normalize a JSON document.
    pub fn from_json(bytes: &[u8], fallback_version: u64) -> Result<Self, serde_json::Error> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(Self::from_value(&raw, fallback_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_normalization() {
        assert_eq!(normalize_rotation(0.0), 0.0);
        assert_eq!(normalize_rotation(180.0), 180.0);
        assert_eq!(normalize_rotation(-180.0), 180.0);
        assert_eq!(normalize_rotation(190.0), -170.0);
        assert_eq!(normalize_rotation(-190.0), 170.0);
        assert_eq!(normalize_rotation(720.0), 0.0);
        assert_eq!(normalize_rotation(-0.1), -0.1);
        assert_eq!(normalize_rotation(f64::NAN), 0.0);
    }

    #[test]
    fn test_rotate_by_wraps() {
        let mut base = PlacementBase::new("Crate", 2.0, 2.0);
        base.rotate_by(170.0);
        base.rotate_by(30.0);
        assert_eq!(base.rotation, -160.0);
    }

    #[test]
    fn test_dimension_floor() {
        let mut base = PlacementBase::new("Pallet", 0.1, f64::NAN);
        assert_eq!(base.width, MIN_DIMENSION_M);
        assert_eq!(base.height, DEFAULT_HEIGHT_M);

        base.resize(f64::INFINITY, 0.0);
        assert_eq!(base.width, MIN_DIMENSION_M);
        assert_eq!(base.height, MIN_DIMENSION_M);
    }

    #[test]
    fn test_history_cap_keeps_newest() {
        let now = Utc::now();
        let mut item = ItemPlacement::new(PlacementBase::new("Crate", 1.0, 1.0), now);
        for i in 0..(HISTORY_CAP + 5) {
            item.record(format!("edit {i}"), now);
        }
        assert_eq!(item.history.len(), HISTORY_CAP);
        assert_eq!(item.history[0].message, format!("edit {}", HISTORY_CAP + 4));
    }

    #[test]
    fn test_placement_serializes_with_type_tag() {
        let now = Utc::now();
        let zone = Placement::Zone(ZonePlacement::new(PlacementBase::new("North", 10.0, 8.0)));
        let value = serde_json::to_value(&zone).unwrap();
        assert_eq!(value["type"], "deck-area");
        assert_eq!(value["nameHidden"], false);
        assert_eq!(value["width"], 10.0);

        let item = Placement::Item(ItemPlacement::new(PlacementBase::new("Tank", 2.0, 2.0), now));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "item");
        assert_eq!(value["shape"], "rectangle");
        assert_eq!(value["underLayer"], false);
        assert!(value["id"].as_str().unwrap().starts_with("item-"));
    }

    #[test]
    fn test_scenario_items_carry_type_tag() {
        let mut scenario = PlanningScenario::new("Lift");
        scenario
            .items
            .push(ItemPlacement::new(PlacementBase::new("Skid", 3.0, 3.0), Utc::now()));
        let value = serde_json::to_value(&scenario).unwrap();
        assert_eq!(value["items"][0]["type"], "item");
        assert_eq!(value["items"][0]["label"], "Skid");
    }

    #[test]
    fn test_zone_addressing_by_order() {
        let now = Utc::now();
        let mut deck = Deck::new("A", now);
        deck.layout.push(Placement::Item(ItemPlacement::new(PlacementBase::new("I", 1.0, 1.0), now)));
        deck.layout.push(Placement::Zone(ZonePlacement::new(PlacementBase::new("Z0", 4.0, 4.0))));
        deck.layout.push(Placement::Zone(ZonePlacement::new(PlacementBase::new("Z1", 4.0, 4.0))));

        assert_eq!(deck.zone_position(0), Some(1));
        assert_eq!(deck.zone_position(1), Some(2));
        assert_eq!(deck.zone_position(2), None);
        assert_eq!(deck.zone_mut(1).unwrap().base.label, "Z1");
    }

    #[test]
    fn test_shape_parse() {
        assert_eq!(Shape::parse("Circle"), Some(Shape::Circle));
        assert_eq!(Shape::parse("right-triangle"), Some(Shape::RightTriangle));
        assert_eq!(Shape::parse("hexagon"), None);
        assert_eq!(Shape::EquilateralTriangle.as_str(), "equilateral-triangle");
    }
}

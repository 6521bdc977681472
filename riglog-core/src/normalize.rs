//! Boundary normalization: arbitrary JSON in, schema-valid model out.
//!
//! Nothing here fails.  Garbage numbers fall back to fixed defaults,
//! missing ids are minted, unknown fields are dropped.  Applying the
//! normalizer to its own serialized output is a fixed point.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::model::*;

// ───────────────────────────────────────────────────────────────────
// Field coercion
// ───────────────────────────────────────────────────────────────────

/// Finite number from a JSON number or numeric string.
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Trimmed, non-empty string.
fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// String kept verbatim (comments, media types, content references).
fn raw_text(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.as_str() == "true",
        _ => false,
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn array(value: Option<&Value>) -> &[Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

// ───────────────────────────────────────────────────────────────────
// Envelope
// ───────────────────────────────────────────────────────────────────

impl StateEnvelope {
    /// Normalize an untrusted document.
    ///
    /// The document's own `version` is kept when it is a non-negative
    /// integer, otherwise `fallback_version` is used.  A missing, empty or
    /// non-array `decks` field yields the default decks.
    pub fn from_value(raw: &Value, fallback_version: u64) -> Self {
        let now = Utc::now();
        let version = number(raw.get("version"))
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as u64)
            .unwrap_or(fallback_version);

        let decks = match raw.get("decks").and_then(Value::as_array) {
            Some(entries) if !entries.is_empty() => {
                entries.iter().map(|deck| normalize_deck(deck, now)).collect()
            }
            _ => {
                log::debug!("Envelope without decks, using default decks");
                DEFAULT_DECK_NAMES
                    .iter()
                    .map(|name| Deck::new(*name, now))
                    .collect()
            }
        };

        Self {
            version,
            decks,
            mutation_timestamp: timestamp(raw.get("mutationTimestamp")),
        }
    }
}

pub fn normalize_deck(raw: &Value, now: DateTime<Utc>) -> Deck {
    let Some(obj) = raw.as_object() else {
        let name = text(Some(raw)).unwrap_or_else(|| DEFAULT_DECK_NAME.to_string());
        return Deck::new(name, now);
    };

    let mut seen = HashSet::new();
    let layout = array(obj.get("layout"))
        .iter()
        .filter_map(|entry| normalize_placement(entry, now))
        .map(|mut entry| {
            if let Placement::Item(item) = &mut entry {
                if !seen.insert(item.id.clone()) {
                    item.id = mint_id("item");
                    seen.insert(item.id.clone());
                }
            }
            entry
        })
        .collect();

    let scenarios_source = match obj.get("scenarios") {
        Some(Value::Array(entries)) => entries.as_slice(),
        _ => array(obj.get("jobs")),
    };
    let scenarios = scenarios_source
        .iter()
        .map(|scenario| normalize_scenario(scenario, now))
        .collect();

    Deck {
        id: text(obj.get("id")).unwrap_or_else(|| mint_id("deck")),
        name: text(obj.get("name")).unwrap_or_else(|| DEFAULT_DECK_NAME.to_string()),
        layout,
        scenarios,
        updated_at: timestamp(obj.get("updatedAt")).unwrap_or(now),
    }
}

// ───────────────────────────────────────────────────────────────────
// Placements
// ───────────────────────────────────────────────────────────────────

fn normalize_base(obj: &Map<String, Value>, default_label: &str) -> PlacementBase {
    PlacementBase {
        label: text(obj.get("label")).unwrap_or_else(|| default_label.to_string()),
        width: clamp_dimension(number(obj.get("width")).unwrap_or(DEFAULT_WIDTH_M), DEFAULT_WIDTH_M),
        height: clamp_dimension(
            number(obj.get("height")).unwrap_or(DEFAULT_HEIGHT_M),
            DEFAULT_HEIGHT_M,
        ),
        x: number(obj.get("x")).unwrap_or(0.0),
        y: number(obj.get("y")).unwrap_or(0.0),
        rotation: normalize_rotation(number(obj.get("rotation")).unwrap_or(0.0)),
        locked: flag(obj.get("locked")),
    }
}

/// Normalize one layout entry.  Non-objects are discarded; anything not
/// tagged `deck-area` is treated as an item.
pub fn normalize_placement(raw: &Value, now: DateTime<Utc>) -> Option<Placement> {
    let obj = raw.as_object()?;
    if obj.get("type").and_then(Value::as_str) == Some("deck-area") {
        return Some(Placement::Zone(ZonePlacement {
            base: normalize_base(obj, DEFAULT_ZONE_LABEL),
            name_hidden: flag(obj.get("nameHidden")),
        }));
    }
    Some(Placement::Item(normalize_item(obj, now)))
}

fn normalize_item(obj: &Map<String, Value>, now: DateTime<Utc>) -> ItemPlacement {
    let attachments = array(obj.get("attachments"))
        .iter()
        .filter_map(|entry| normalize_attachment(entry, now))
        .collect();

    let mut history: Vec<HistoryRecord> = array(obj.get("history"))
        .iter()
        .filter_map(|entry| normalize_history(entry, now))
        .collect();
    history.truncate(HISTORY_CAP);

    let last_modified = timestamp(obj.get("lastModified"))
        .or_else(|| history.first().map(|record| record.timestamp))
        .unwrap_or(now);

    ItemPlacement {
        id: text(obj.get("id")).unwrap_or_else(|| mint_id("item")),
        base: normalize_base(obj, DEFAULT_ITEM_LABEL),
        color: text(obj.get("color")).unwrap_or_else(|| DEFAULT_ITEM_COLOR.to_string()),
        shape: obj
            .get("shape")
            .and_then(Value::as_str)
            .and_then(Shape::parse)
            .unwrap_or_default(),
        under_layer: flag(obj.get("underLayer")),
        comment: raw_text(obj.get("comment")),
        attachments,
        history,
        last_modified,
    }
}

fn normalize_attachment(raw: &Value, now: DateTime<Utc>) -> Option<Attachment> {
    let obj = raw.as_object()?;
    let size = number(obj.get("size"))
        .filter(|size| *size >= 0.0)
        .map(|size| size as u64)
        .unwrap_or(0);
    Some(Attachment {
        id: text(obj.get("id")).unwrap_or_else(|| mint_id("attachment")),
        filename: obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| DEFAULT_ATTACHMENT_NAME.to_string()),
        media_type: raw_text(obj.get("type")),
        size,
        content_ref: raw_text(obj.get("dataUrl")),
        added_at: timestamp(obj.get("addedAt")).unwrap_or(now),
    })
}

fn normalize_history(raw: &Value, now: DateTime<Utc>) -> Option<HistoryRecord> {
    let obj = raw.as_object()?;
    let message = text(obj.get("message"))?;
    Some(HistoryRecord {
        message,
        timestamp: timestamp(obj.get("timestamp")).unwrap_or(now),
    })
}

// ───────────────────────────────────────────────────────────────────
// Scenarios
// ───────────────────────────────────────────────────────────────────

/// Normalize a planning scenario.  Accepts `{ items }` as well as the
/// older `{ deck: { items } }` shape.  Only entries tagged `item` are kept.
pub fn normalize_scenario(raw: &Value, now: DateTime<Utc>) -> PlanningScenario {
    let Some(obj) = raw.as_object() else {
        return PlanningScenario::new(DEFAULT_SCENARIO_LABEL);
    };

    let source = match obj.get("items") {
        Some(Value::Array(entries)) => entries.as_slice(),
        _ => array(obj.get("deck").and_then(|deck| deck.get("items"))),
    };

    let mut seen = HashSet::new();
    let items = source
        .iter()
        .filter_map(Value::as_object)
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("item"))
        .map(|entry| {
            let mut item = normalize_item(entry, now);
            if !seen.insert(item.id.clone()) {
                item.id = mint_id("item");
                seen.insert(item.id.clone());
            }
            item
        })
        .collect();

    PlanningScenario {
        id: text(obj.get("id")).unwrap_or_else(|| mint_id("plan")),
        label: text(obj.get("label")).unwrap_or_else(|| DEFAULT_SCENARIO_LABEL.to_string()),
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Value {
        json!({
            "version": 4,
            "decks": [{
                "id": "deck-a",
                "name": "  Statfjord A deck ",
                "updatedAt": "2024-05-01T10:00:00Z",
                "layout": [
                    {
                        "type": "deck-area",
                        "label": "North",
                        "width": "12",
                        "height": 8,
                        "x": 0, "y": 0,
                        "rotation": 0,
                        "nameHidden": "true"
                    },
                    {
                        "type": "item",
                        "id": "item-1",
                        "label": "Container",
                        "width": 4, "height": 2,
                        "x": 100, "y": 50,
                        "rotation": 270,
                        "locked": true,
                        "color": "#ff0000",
                        "shape": "circle",
                        "comment": "fragile",
                        "attachments": [
                            {"id": "att-1", "name": "manifest.pdf", "type": "application/pdf",
                             "size": 2048, "dataUrl": "data:...", "addedAt": "2024-05-01T09:00:00Z"},
                            "garbage"
                        ],
                        "history": [
                            {"message": "Moved", "timestamp": "2024-05-01T09:30:00Z"},
                            {"message": "   "}
                        ],
                        "extra": "dropped"
                    },
                    42
                ],
                "scenarios": [{
                    "id": "plan-1",
                    "label": "Crane lift",
                    "items": [
                        {"type": "item", "id": "s-1", "label": "Skid", "width": 3, "height": 3},
                        {"type": "deck-area", "label": "ignored"}
                    ]
                }]
            }]
        })
    }

    #[test]
    fn test_normalize_coerces_fields() {
        let env = StateEnvelope::from_value(&sample_document(), 0);
        assert_eq!(env.version, 4);
        assert_eq!(env.decks.len(), 1);

        let deck = &env.decks[0];
        assert_eq!(deck.name, "Statfjord A deck");
        assert_eq!(deck.layout.len(), 2);

        let zone = deck.zones().next().unwrap();
        assert_eq!(zone.base.width, 12.0);
        assert!(zone.name_hidden);

        let item = deck.item("item-1").unwrap();
        assert_eq!(item.base.rotation, -90.0);
        assert!(item.base.locked);
        assert_eq!(item.shape, Shape::Circle);
        assert_eq!(item.attachments.len(), 1);
        assert_eq!(item.attachments[0].size, 2048);
        assert_eq!(item.history.len(), 1);
        assert_eq!(item.last_modified, item.history[0].timestamp);

        let scenario = deck.scenario("plan-1").unwrap();
        assert_eq!(scenario.items.len(), 1);
        assert_eq!(scenario.items[0].id, "s-1");
    }

    #[test]
    fn test_normalize_defaults_malformed_numbers() {
        let raw = json!({
            "decks": [{
                "layout": [{ "width": "NaN", "height": null, "x": "abc", "rotation": {} }]
            }]
        });
        let env = StateEnvelope::from_value(&raw, 9);
        assert_eq!(env.version, 9);

        let deck = &env.decks[0];
        assert!(deck.id.starts_with("deck-"));
        assert_eq!(deck.name, DEFAULT_DECK_NAME);

        let item = deck.items().next().unwrap();
        assert_eq!(item.base.width, DEFAULT_WIDTH_M);
        assert_eq!(item.base.height, DEFAULT_HEIGHT_M);
        assert_eq!(item.base.x, 0.0);
        assert_eq!(item.base.rotation, 0.0);
        assert_eq!(item.base.label, DEFAULT_ITEM_LABEL);
        assert_eq!(item.color, DEFAULT_ITEM_COLOR);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let first = StateEnvelope::from_value(&sample_document(), 0);
        let first_bytes = first.to_json().unwrap();

        let reparsed: Value = serde_json::from_slice(&first_bytes).unwrap();
        let second = StateEnvelope::from_value(&reparsed, 0);
        let second_bytes = second.to_json().unwrap();

        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn test_missing_or_empty_decks_use_defaults() {
        for raw in [json!({}), json!({ "decks": [] }), json!({ "decks": "none" })] {
            let env = StateEnvelope::from_value(&raw, 1);
            let names: Vec<&str> = env.decks.iter().map(|d| d.name.as_str()).collect();
            assert_eq!(names, DEFAULT_DECK_NAMES.to_vec());
        }
    }

    #[test]
    fn test_scenario_keeps_only_tagged_items() {
        let raw = json!({
            "decks": [{ "id": "d", "scenarios": [{ "id": "p", "items": [
                { "type": "item", "label": "Skid" },
                { "label": "Untyped" },
                { "type": "deck-area", "label": "Zone" },
                { "type": 7, "label": "Numeric" }
            ]}]}]
        });
        let env = StateEnvelope::from_value(&raw, 1);
        let labels: Vec<&str> = env.decks[0].scenarios[0]
            .items
            .iter()
            .map(|i| i.base.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Skid"]);

        // Serialized scenarios survive a second pass.
        let again = StateEnvelope::from_value(&env.to_value().unwrap(), 1);
        assert_eq!(again.decks[0].scenarios[0].items.len(), 1);
    }

    #[test]
    fn test_duplicate_item_ids_are_reminted() {
        let raw = json!({
            "decks": [{ "id": "d", "layout": [
                { "type": "item", "id": "dup" },
                { "type": "item", "id": "dup" }
            ]}]
        });
        let env = StateEnvelope::from_value(&raw, 1);
        let ids: Vec<&str> = env.decks[0].items().map(|i| i.id.as_str()).collect();
        assert_eq!(ids[0], "dup");
        assert_ne!(ids[1], "dup");
    }

    #[test]
    fn test_legacy_jobs_shape() {
        let raw = json!({
            "decks": [{ "id": "d", "jobs": [
                { "label": "Old plan", "deck": { "items": [ { "type": "item", "label": "Skid" } ] } }
            ]}]
        });
        let env = StateEnvelope::from_value(&raw, 1);
        let scenario = &env.decks[0].scenarios[0];
        assert_eq!(scenario.label, "Old plan");
        assert!(scenario.id.starts_with("plan-"));
        assert_eq!(scenario.items[0].base.label, "Skid");
    }

    #[test]
    fn test_string_deck_becomes_named_deck() {
        let env = StateEnvelope::from_value(&json!({ "decks": ["Mud deck", null] }), 1);
        assert_eq!(env.decks[0].name, "Mud deck");
        assert_eq!(env.decks[1].name, DEFAULT_DECK_NAME);
    }

    #[test]
    fn test_history_capped() {
        let history: Vec<Value> = (0..80)
            .map(|i| json!({ "message": format!("edit {i}"), "timestamp": "2024-01-01T00:00:00Z" }))
            .collect();
        let raw = json!({ "decks": [{ "layout": [{ "type": "item", "history": history }] }] });
        let env = StateEnvelope::from_value(&raw, 1);
        let item = env.decks[0].items().next().unwrap();
        assert_eq!(item.history.len(), HISTORY_CAP);
        assert_eq!(item.history[0].message, "edit 0");
    }
}

//! Mutation commands emitted by the gesture/input layer.
//!
//! Commands are applied to a deck list in place.  Locks only stop
//! gesture-driven spatial edits; programmatic edits always go through.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Deck not found: {0}")]
    DeckNotFound(String),
    #[error("Item not found: {0}")]
    ItemNotFound(String),
    #[error("Zone not found at index {0}")]
    ZoneNotFound(usize),
    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),
    #[error("Attachment not found: {0}")]
    AttachmentNotFound(String),
    #[error("Placement is locked")]
    Locked,
    #[error("Name must not be empty")]
    EmptyName,
}

/// Who asked for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Gesture,
    Programmatic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementEdit {
    /// Translate by a delta in workspace units.
    Move { dx: f64, dy: f64 },
    /// New size in meters.
    Resize { width: f64, height: f64 },
    /// Rotate by a delta in degrees.
    Rotate { degrees: f64 },
    SetLocked(bool),
    Relabel(String),
}

impl PlacementEdit {
    fn is_spatial(&self) -> bool {
        matches!(
            self,
            PlacementEdit::Move { .. } | PlacementEdit::Resize { .. } | PlacementEdit::Rotate { .. }
        )
    }

    /// Apply to a placement, returning a history message.
    pub fn apply(&self, base: &mut PlacementBase, origin: Origin) -> Result<String, CommandError> {
        if base.locked && origin == Origin::Gesture && self.is_spatial() {
            return Err(CommandError::Locked);
        }
        let message = match self {
            PlacementEdit::Move { dx, dy } => {
                base.translate(*dx, *dy);
                "Moved".to_string()
            }
            PlacementEdit::Resize { width, height } => {
                base.resize(*width, *height);
                format!("Resized to {:.2} × {:.2} m", base.width, base.height)
            }
            PlacementEdit::Rotate { degrees } => {
                base.rotate_by(*degrees);
                format!("Rotated to {}°", base.rotation.round())
            }
            PlacementEdit::SetLocked(locked) => {
                base.locked = *locked;
                let message = if *locked { "Locked" } else { "Unlocked" };
                message.to_string()
            }
            PlacementEdit::Relabel(label) => {
                let label = label.trim();
                if label.is_empty() {
                    return Err(CommandError::EmptyName);
                }
                base.label = label.to_string();
                format!("Renamed: {label}")
            }
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemEdit {
    Placement(PlacementEdit),
    Recolor(String),
    Reshape(Shape),
    SetUnderLayer(bool),
    SetComment(String),
    Attach(Attachment),
    Detach(String),
}

impl ItemEdit {
    pub fn apply(
        self,
        item: &mut ItemPlacement,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<(), CommandError> {
        let message = match self {
            ItemEdit::Placement(edit) => edit.apply(&mut item.base, origin)?,
            ItemEdit::Recolor(color) => {
                item.color = match color.trim() {
                    "" => DEFAULT_ITEM_COLOR.to_string(),
                    trimmed => trimmed.to_string(),
                };
                "Color changed".to_string()
            }
            ItemEdit::Reshape(shape) => {
                item.shape = shape;
                format!("Shape changed to {}", shape.as_str())
            }
            ItemEdit::SetUnderLayer(under) => {
                item.under_layer = under;
                let message = if under { "Moved under layer" } else { "Moved above layer" };
                message.to_string()
            }
            ItemEdit::SetComment(comment) => {
                item.comment = comment;
                "Comment updated".to_string()
            }
            ItemEdit::Attach(mut attachment) => {
                if attachment.filename.is_empty() {
                    attachment.filename = DEFAULT_ATTACHMENT_NAME.to_string();
                }
                let message = format!("Attachment added: {}", attachment.filename);
                item.attachments.push(attachment);
                message
            }
            ItemEdit::Detach(attachment_id) => {
                let position = item
                    .attachments
                    .iter()
                    .position(|a| a.id == attachment_id)
                    .ok_or(CommandError::AttachmentNotFound(attachment_id))?;
                let removed = item.attachments.remove(position);
                format!("Attachment removed: {}", removed.filename)
            }
        };
        item.record(message, now);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEdit {
    Placement(PlacementEdit),
    SetNameHidden(bool),
}

/// Parameters for a new item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub label: String,
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub color: Option<String>,
    pub shape: Shape,
}

impl NewItem {
    pub fn new(label: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            x: 0.0,
            y: 0.0,
            color: None,
            shape: Shape::Rectangle,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn shaped(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    pub fn into_item(self, now: DateTime<Utc>) -> ItemPlacement {
        let label = match self.label.trim() {
            "" => DEFAULT_ITEM_LABEL.to_string(),
            trimmed => trimmed.to_string(),
        };
        let base = PlacementBase::new(label.clone(), self.width, self.height).at(self.x, self.y);
        let mut item = ItemPlacement::new(base, now);
        if let Some(color) = self.color.filter(|c| !c.trim().is_empty()) {
            item.color = color;
        }
        item.shape = self.shape;
        item.record(format!("Item created: {label}"), now);
        item
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewZone {
    pub label: String,
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
}

impl NewZone {
    pub fn new(label: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateDeck { name: String },
    RenameDeck { deck: String, name: String },
    DeleteDeck { deck: String },
    AddItem { deck: String, item: NewItem },
    AddZone { deck: String, zone: NewZone },
    EditItem { deck: String, item: String, edit: ItemEdit },
    EditZone { deck: String, zone: usize, edit: ZoneEdit },
    RemoveItem { deck: String, item: String },
    RemoveZone { deck: String, zone: usize },
    CreateScenario { deck: String, label: String },
    /// Write an edited scenario's placements back into its record.
    StoreScenario { deck: String, scenario: String, items: Vec<ItemPlacement> },
    DeleteScenario { deck: String, scenario: String },
}

impl Mutation {
    pub fn deck_id(&self) -> Option<&str> {
        match self {
            Mutation::CreateDeck { .. } => None,
            Mutation::RenameDeck { deck, .. }
            | Mutation::DeleteDeck { deck }
            | Mutation::AddItem { deck, .. }
            | Mutation::AddZone { deck, .. }
            | Mutation::EditItem { deck, .. }
            | Mutation::EditZone { deck, .. }
            | Mutation::RemoveItem { deck, .. }
            | Mutation::RemoveZone { deck, .. }
            | Mutation::CreateScenario { deck, .. }
            | Mutation::StoreScenario { deck, .. }
            | Mutation::DeleteScenario { deck, .. } => Some(deck),
        }
    }
}

/// What an applied mutation touched.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub deck: Option<String>,
    /// Id minted by a create command.
    pub created: Option<String>,
    pub summary: String,
}

fn deck_mut<'a>(decks: &'a mut [Deck], id: &str) -> Result<&'a mut Deck, CommandError> {
    decks
        .iter_mut()
        .find(|deck| deck.id == id)
        .ok_or_else(|| CommandError::DeckNotFound(id.to_string()))
}

/// Apply one mutation to the deck list.
pub fn apply_mutation(
    decks: &mut Vec<Deck>,
    mutation: Mutation,
    origin: Origin,
    now: DateTime<Utc>,
) -> Result<MutationOutcome, CommandError> {
    let deck_id = mutation.deck_id().map(str::to_owned);
    let mut created = None;

    let summary = match mutation {
        Mutation::CreateDeck { name } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(CommandError::EmptyName);
            }
            let deck = Deck::new(name, now);
            created = Some(deck.id.clone());
            decks.push(deck);
            format!("Deck created: {name}")
        }
        Mutation::RenameDeck { deck, name } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(CommandError::EmptyName);
            }
            let target = deck_mut(decks, &deck)?;
            target.name = name.to_string();
            target.touch(now);
            format!("Deck renamed: {name}")
        }
        Mutation::DeleteDeck { deck } => {
            let position = decks
                .iter()
                .position(|d| d.id == deck)
                .ok_or_else(|| CommandError::DeckNotFound(deck.clone()))?;
            let removed = decks.remove(position);
            format!("Deck deleted: {}", removed.name)
        }
        Mutation::AddItem { deck, item } => {
            let target = deck_mut(decks, &deck)?;
            let item = item.into_item(now);
            created = Some(item.id.clone());
            let summary = format!("Item created: {}", item.base.label);
            target.layout.push(Placement::Item(item));
            target.touch(now);
            summary
        }
        Mutation::AddZone { deck, zone } => {
            let target = deck_mut(decks, &deck)?;
            let label = match zone.label.trim() {
                "" => DEFAULT_ZONE_LABEL.to_string(),
                trimmed => trimmed.to_string(),
            };
            let base = PlacementBase::new(label.clone(), zone.width, zone.height).at(zone.x, zone.y);
            // Zones draw beneath items.
            target.layout.insert(0, Placement::Zone(ZonePlacement::new(base)));
            target.touch(now);
            format!("Deck area created: {label}")
        }
        Mutation::EditItem { deck, item, edit } => {
            let target = deck_mut(decks, &deck)?;
            let placement = target
                .item_mut(&item)
                .ok_or_else(|| CommandError::ItemNotFound(item.clone()))?;
            edit.apply(placement, origin, now)?;
            let summary = placement
                .history
                .first()
                .map(|record| record.message.clone())
                .unwrap_or_default();
            target.touch(now);
            summary
        }
        Mutation::EditZone { deck, zone, edit } => {
            let target = deck_mut(decks, &deck)?;
            let placement = target.zone_mut(zone).ok_or(CommandError::ZoneNotFound(zone))?;
            let summary = match edit {
                ZoneEdit::Placement(edit) => edit.apply(&mut placement.base, origin)?,
                ZoneEdit::SetNameHidden(hidden) => {
                    placement.name_hidden = hidden;
                    let message = if hidden { "Deck name hidden" } else { "Deck name shown" };
                    message.to_string()
                }
            };
            let summary = format!("{summary}: {}", placement.base.label);
            target.touch(now);
            summary
        }
        Mutation::RemoveItem { deck, item } => {
            let target = deck_mut(decks, &deck)?;
            let position = target
                .layout
                .iter()
                .position(|entry| matches!(entry, Placement::Item(i) if i.id == item))
                .ok_or_else(|| CommandError::ItemNotFound(item.clone()))?;
            if origin == Origin::Gesture && target.layout[position].base().locked {
                return Err(CommandError::Locked);
            }
            target.layout.remove(position);
            target.touch(now);
            "Item deleted".to_string()
        }
        Mutation::RemoveZone { deck, zone } => {
            let target = deck_mut(decks, &deck)?;
            let position = target.zone_position(zone).ok_or(CommandError::ZoneNotFound(zone))?;
            if origin == Origin::Gesture && target.layout[position].base().locked {
                return Err(CommandError::Locked);
            }
            let removed = target.layout.remove(position);
            target.touch(now);
            format!("Deck area deleted: {}", removed.base().label)
        }
        Mutation::CreateScenario { deck, label } => {
            let target = deck_mut(decks, &deck)?;
            let label = match label.trim() {
                "" => DEFAULT_SCENARIO_LABEL.to_string(),
                trimmed => trimmed.to_string(),
            };
            let scenario = PlanningScenario::new(label.clone());
            created = Some(scenario.id.clone());
            target.scenarios.push(scenario);
            target.touch(now);
            format!("Scenario created: {label}")
        }
        Mutation::StoreScenario { deck, scenario, items } => {
            let target = deck_mut(decks, &deck)?;
            let record = target
                .scenario_mut(&scenario)
                .ok_or_else(|| CommandError::ScenarioNotFound(scenario.clone()))?;
            record.items = items;
            let summary = format!("Scenario saved: {}", record.label);
            target.touch(now);
            summary
        }
        Mutation::DeleteScenario { deck, scenario } => {
            let target = deck_mut(decks, &deck)?;
            let position = target
                .scenarios
                .iter()
                .position(|s| s.id == scenario)
                .ok_or_else(|| CommandError::ScenarioNotFound(scenario.clone()))?;
            let removed = target.scenarios.remove(position);
            target.touch(now);
            format!("Scenario deleted: {}", removed.label)
        }
    };

    log::debug!("Applied mutation: {summary}");
    Ok(MutationOutcome {
        deck: deck_id,
        created,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck_with_item(locked: bool) -> (Vec<Deck>, String, String) {
        let now = Utc::now();
        let mut decks = vec![Deck::new("A", now)];
        let deck_id = decks[0].id.clone();
        let outcome = apply_mutation(
            &mut decks,
            Mutation::AddItem {
                deck: deck_id.clone(),
                item: NewItem::new("Container", 4.0, 2.0).at(100.0, 50.0),
            },
            Origin::Gesture,
            now,
        )
        .unwrap();
        let item_id = outcome.created.unwrap();
        if locked {
            decks[0].item_mut(&item_id).unwrap().base.locked = true;
        }
        (decks, deck_id, item_id)
    }

    #[test]
    fn test_create_and_delete_deck() {
        let now = Utc::now();
        let mut decks = Vec::new();
        let outcome = apply_mutation(
            &mut decks,
            Mutation::CreateDeck { name: "  Pipe deck ".into() },
            Origin::Gesture,
            now,
        )
        .unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].name, "Pipe deck");

        let id = outcome.created.unwrap();
        apply_mutation(&mut decks, Mutation::DeleteDeck { deck: id }, Origin::Gesture, now).unwrap();
        assert!(decks.is_empty());
    }

    #[test]
    fn test_empty_deck_name_rejected() {
        let mut decks = Vec::new();
        let result = apply_mutation(
            &mut decks,
            Mutation::CreateDeck { name: "   ".into() },
            Origin::Gesture,
            Utc::now(),
        );
        assert_eq!(result, Err(CommandError::EmptyName));
    }

    #[test]
    fn test_move_records_history() {
        let (mut decks, deck, item) = deck_with_item(false);
        apply_mutation(
            &mut decks,
            Mutation::EditItem {
                deck,
                item: item.clone(),
                edit: ItemEdit::Placement(PlacementEdit::Move { dx: 10.0, dy: -5.0 }),
            },
            Origin::Gesture,
            Utc::now(),
        )
        .unwrap();

        let placement = decks[0].item(&item).unwrap();
        assert_eq!(placement.base.x, 110.0);
        assert_eq!(placement.base.y, 45.0);
        assert_eq!(placement.history[0].message, "Moved");
        assert_eq!(placement.history[1].message, "Item created: Container");
    }

    #[test]
    fn test_lock_blocks_gesture_but_not_programmatic() {
        let (mut decks, deck, item) = deck_with_item(true);
        let rotate = || Mutation::EditItem {
            deck: deck.clone(),
            item: item.clone(),
            edit: ItemEdit::Placement(PlacementEdit::Rotate { degrees: 200.0 }),
        };

        let blocked = apply_mutation(&mut decks, rotate(), Origin::Gesture, Utc::now());
        assert_eq!(blocked, Err(CommandError::Locked));
        assert_eq!(decks[0].item(&item).unwrap().base.rotation, 0.0);

        apply_mutation(&mut decks, rotate(), Origin::Programmatic, Utc::now()).unwrap();
        assert_eq!(decks[0].item(&item).unwrap().base.rotation, -160.0);
    }

    #[test]
    fn test_locked_item_comment_still_allowed() {
        let (mut decks, deck, item) = deck_with_item(true);
        apply_mutation(
            &mut decks,
            Mutation::EditItem {
                deck,
                item: item.clone(),
                edit: ItemEdit::SetComment("Check straps".into()),
            },
            Origin::Gesture,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(decks[0].item(&item).unwrap().comment, "Check straps");
    }

    #[test]
    fn test_locked_item_cannot_be_removed_by_gesture() {
        let (mut decks, deck, item) = deck_with_item(true);
        let result = apply_mutation(
            &mut decks,
            Mutation::RemoveItem { deck, item },
            Origin::Gesture,
            Utc::now(),
        );
        assert_eq!(result, Err(CommandError::Locked));
        assert_eq!(decks[0].layout.len(), 1);
    }

    #[test]
    fn test_attach_and_detach() {
        let (mut decks, deck, item) = deck_with_item(false);
        let now = Utc::now();
        let attachment = Attachment::new("lift-plan.pdf", "application/pdf", 1024, "blob:1", now);
        let attachment_id = attachment.id.clone();

        apply_mutation(
            &mut decks,
            Mutation::EditItem { deck: deck.clone(), item: item.clone(), edit: ItemEdit::Attach(attachment) },
            Origin::Gesture,
            now,
        )
        .unwrap();
        assert_eq!(decks[0].item(&item).unwrap().attachments.len(), 1);

        apply_mutation(
            &mut decks,
            Mutation::EditItem { deck: deck.clone(), item: item.clone(), edit: ItemEdit::Detach(attachment_id.clone()) },
            Origin::Gesture,
            now,
        )
        .unwrap();
        let placement = decks[0].item(&item).unwrap();
        assert!(placement.attachments.is_empty());
        assert_eq!(placement.history[0].message, "Attachment removed: lift-plan.pdf");

        let missing = apply_mutation(
            &mut decks,
            Mutation::EditItem { deck, item, edit: ItemEdit::Detach(attachment_id.clone()) },
            Origin::Gesture,
            now,
        );
        assert_eq!(missing, Err(CommandError::AttachmentNotFound(attachment_id)));
    }

    #[test]
    fn test_blank_color_and_filename_get_defaults() {
        let (mut decks, deck, item) = deck_with_item(false);
        let now = Utc::now();
        let on_item = |edit: ItemEdit| Mutation::EditItem { deck: deck.clone(), item: item.clone(), edit };

        apply_mutation(&mut decks, on_item(ItemEdit::Recolor(" #ff8800 ".into())), Origin::Gesture, now).unwrap();
        assert_eq!(decks[0].item(&item).unwrap().color, "#ff8800");
        apply_mutation(&mut decks, on_item(ItemEdit::Recolor("   ".into())), Origin::Gesture, now).unwrap();
        assert_eq!(decks[0].item(&item).unwrap().color, DEFAULT_ITEM_COLOR);

        let unnamed = Attachment::new("", "image/png", 10, "blob:2", now);
        apply_mutation(&mut decks, on_item(ItemEdit::Attach(unnamed)), Origin::Gesture, now).unwrap();
        let placement = decks[0].item(&item).unwrap();
        assert_eq!(placement.attachments[0].filename, DEFAULT_ATTACHMENT_NAME);
        assert_eq!(placement.history[0].message, "Attachment added: Attachment");
    }

    #[test]
    fn test_zone_added_below_items_and_edited_by_index() {
        let (mut decks, deck, _) = deck_with_item(false);
        let now = Utc::now();
        apply_mutation(
            &mut decks,
            Mutation::AddZone { deck: deck.clone(), zone: NewZone::new("", 20.0, 10.0) },
            Origin::Gesture,
            now,
        )
        .unwrap();
        assert!(matches!(decks[0].layout[0], Placement::Zone(_)));

        let outcome = apply_mutation(
            &mut decks,
            Mutation::EditZone { deck: deck.clone(), zone: 0, edit: ZoneEdit::SetNameHidden(true) },
            Origin::Gesture,
            now,
        )
        .unwrap();
        assert_eq!(outcome.summary, "Deck name hidden: Deck area");
        assert!(decks[0].zones().next().unwrap().name_hidden);

        apply_mutation(&mut decks, Mutation::RemoveZone { deck, zone: 0 }, Origin::Gesture, now).unwrap();
        assert_eq!(decks[0].zones().count(), 0);
    }

    #[test]
    fn test_scenario_lifecycle() {
        let (mut decks, deck, _) = deck_with_item(false);
        let now = Utc::now();
        let scenario = apply_mutation(
            &mut decks,
            Mutation::CreateScenario { deck: deck.clone(), label: "Crane lift".into() },
            Origin::Programmatic,
            now,
        )
        .unwrap()
        .created
        .unwrap();

        let items = vec![NewItem::new("Skid", 3.0, 3.0).into_item(now)];
        apply_mutation(
            &mut decks,
            Mutation::StoreScenario { deck: deck.clone(), scenario: scenario.clone(), items },
            Origin::Programmatic,
            now,
        )
        .unwrap();
        assert_eq!(decks[0].scenario(&scenario).unwrap().items.len(), 1);
        assert_eq!(decks[0].items().count(), 1);

        apply_mutation(
            &mut decks,
            Mutation::DeleteScenario { deck, scenario },
            Origin::Programmatic,
            now,
        )
        .unwrap();
        assert!(decks[0].scenarios.is_empty());
    }

    #[test]
    fn test_unknown_targets() {
        let (mut decks, deck, _) = deck_with_item(false);
        let now = Utc::now();
        assert_eq!(
            apply_mutation(&mut decks, Mutation::DeleteDeck { deck: "nope".into() }, Origin::Gesture, now),
            Err(CommandError::DeckNotFound("nope".into()))
        );
        assert_eq!(
            apply_mutation(
                &mut decks,
                Mutation::EditZone { deck, zone: 3, edit: ZoneEdit::SetNameHidden(true) },
                Origin::Gesture,
                now
            ),
            Err(CommandError::ZoneNotFound(3))
        );
    }
}

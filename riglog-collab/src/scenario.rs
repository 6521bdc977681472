//! Planning scenario sessions.
//!
//! A scenario is an alternate, item-only layout stored on its deck.  One
//! scenario per client may be in edit; its placements live in the session
//! until they are stored back, so edits there never reach the deck's
//! primary layout.  Other visible ("active") scenarios are rendered from
//! read-only copies of their stored placements.
//!
//! The session never touches the deck list itself.  Operations that must
//! change the document return the [`Mutation`] to run through the sync
//! engine.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use riglog_core::{CommandError, Deck, ItemEdit, ItemPlacement, Mutation, NewItem, Origin};
use riglog_layout::{compute_bounds, Bounds};

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioError {
    DeckNotFound(String),
    ScenarioNotFound(String),
    ItemNotFound(String),
    /// Deletion needs explicit confirmation.
    NotConfirmed,
    /// No scenario is in edit.
    NotEditing,
    Command(CommandError),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::DeckNotFound(id) => write!(f, "Deck not found: {id}"),
            ScenarioError::ScenarioNotFound(id) => write!(f, "Scenario not found: {id}"),
            ScenarioError::ItemNotFound(id) => write!(f, "Item not found in scenario: {id}"),
            ScenarioError::NotConfirmed => write!(f, "Scenario deletion was not confirmed"),
            ScenarioError::NotEditing => write!(f, "No scenario is being edited"),
            ScenarioError::Command(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScenarioError {}

impl From<CommandError> for ScenarioError {
    fn from(e: CommandError) -> Self {
        ScenarioError::Command(e)
    }
}

/// The scenario currently in edit and its working placements.
#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    pub deck: String,
    pub scenario: String,
    pub items: Vec<ItemPlacement>,
}

impl EditSession {
    /// Mutation writing the working placements back to the record.
    pub fn store(&self) -> Mutation {
        Mutation::StoreScenario {
            deck: self.deck.clone(),
            scenario: self.scenario.clone(),
            items: self.items.clone(),
        }
    }

    fn item_mut(&mut self, id: &str) -> Result<&mut ItemPlacement, ScenarioError> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| ScenarioError::ItemNotFound(id.to_string()))
    }
}

/// Read-only rendering input for a visible, non-edited scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioView {
    pub deck: String,
    pub scenario: String,
    pub label: String,
    pub items: Vec<ItemPlacement>,
    pub bounds: Bounds,
}

fn find_deck<'a>(decks: &'a [Deck], id: &str) -> Result<&'a Deck, ScenarioError> {
    decks
        .iter()
        .find(|deck| deck.id == id)
        .ok_or_else(|| ScenarioError::DeckNotFound(id.to_string()))
}

#[derive(Debug, Default)]
pub struct ScenarioSession {
    editing: Option<EditSession>,
    /// Visible scenarios per deck.
    active: HashMap<String, BTreeSet<String>>,
}

impl ScenarioSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a scenario in edit.
    ///
    /// Returns the store mutation for the scenario that was in edit before,
    /// which must be applied so its work is not lost.
    pub fn begin_edit(
        &mut self,
        decks: &[Deck],
        deck_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Mutation>, ScenarioError> {
        let deck = find_deck(decks, deck_id)?;
        let scenario = deck
            .scenario(scenario_id)
            .ok_or_else(|| ScenarioError::ScenarioNotFound(scenario_id.to_string()))?;

        if let Some(current) = &self.editing {
            if current.deck == deck_id && current.scenario == scenario_id {
                return Ok(None);
            }
        }

        let previous = self.end_edit();
        self.editing = Some(EditSession {
            deck: deck_id.to_string(),
            scenario: scenario_id.to_string(),
            items: scenario.items.clone(),
        });
        self.set_active(deck_id, scenario_id, true);
        log::debug!("Editing scenario {scenario_id} on deck {deck_id}");
        Ok(previous)
    }

    /// Leave edit mode (switching away or closing).  Returns the store
    /// mutation for the edited scenario.
    pub fn end_edit(&mut self) -> Option<Mutation> {
        self.editing.take().map(|session| session.store())
    }

    pub fn editing(&self) -> Option<&EditSession> {
        self.editing.as_ref()
    }

    fn session_mut(&mut self) -> Result<&mut EditSession, ScenarioError> {
        self.editing.as_mut().ok_or(ScenarioError::NotEditing)
    }

    /// Place a new item in the edited scenario.  Returns its id.
    pub fn add_item(&mut self, item: NewItem, now: DateTime<Utc>) -> Result<String, ScenarioError> {
        let session = self.session_mut()?;
        let item = item.into_item(now);
        let id = item.id.clone();
        session.items.push(item);
        Ok(id)
    }

    pub fn edit_item(
        &mut self,
        item_id: &str,
        edit: ItemEdit,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<(), ScenarioError> {
        let item = self.session_mut()?.item_mut(item_id)?;
        edit.apply(item, origin, now)?;
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: &str, origin: Origin) -> Result<(), ScenarioError> {
        let session = self.session_mut()?;
        let position = session
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| ScenarioError::ItemNotFound(item_id.to_string()))?;
        if origin == Origin::Gesture && session.items[position].base.locked {
            return Err(CommandError::Locked.into());
        }
        session.items.remove(position);
        Ok(())
    }

    pub fn set_active(&mut self, deck_id: &str, scenario_id: &str, visible: bool) {
        if visible {
            self.active
                .entry(deck_id.to_string())
                .or_default()
                .insert(scenario_id.to_string());
        } else if let Some(set) = self.active.get_mut(deck_id) {
            set.remove(scenario_id);
            if set.is_empty() {
                self.active.remove(deck_id);
            }
        }
    }

    pub fn is_active(&self, deck_id: &str, scenario_id: &str) -> bool {
        self.active
            .get(deck_id)
            .is_some_and(|set| set.contains(scenario_id))
    }

    /// Read-only views of the deck's visible scenarios, except the one in
    /// edit.
    pub fn views(&self, decks: &[Deck], deck_id: &str) -> Vec<ScenarioView> {
        let (Ok(deck), Some(active)) = (find_deck(decks, deck_id), self.active.get(deck_id)) else {
            return Vec::new();
        };
        deck.scenarios
            .iter()
            .filter(|scenario| active.contains(&scenario.id))
            .filter(|scenario| {
                self.editing
                    .as_ref()
                    .map_or(true, |session| session.deck != deck_id || session.scenario != scenario.id)
            })
            .map(|scenario| ScenarioView {
                deck: deck_id.to_string(),
                scenario: scenario.id.clone(),
                label: scenario.label.clone(),
                items: scenario.items.clone(),
                bounds: compute_bounds(&scenario.items),
            })
            .collect()
    }

    /// Delete a scenario after the user confirmed.
    pub fn delete(
        &mut self,
        decks: &[Deck],
        deck_id: &str,
        scenario_id: &str,
        confirmed: bool,
    ) -> Result<Mutation, ScenarioError> {
        if !confirmed {
            return Err(ScenarioError::NotConfirmed);
        }
        let deck = find_deck(decks, deck_id)?;
        if deck.scenario(scenario_id).is_none() {
            return Err(ScenarioError::ScenarioNotFound(scenario_id.to_string()));
        }

        let mutation = Mutation::DeleteScenario {
            deck: deck_id.to_string(),
            scenario: scenario_id.to_string(),
        };
        self.observe(&mutation);
        Ok(mutation)
    }

    /// Follow a mutation applied to the document.  Deleting a deck or a
    /// scenario drops the edit session and visibility keyed to it.
    pub fn observe(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::DeleteDeck { deck } => self.forget_deck(deck),
            Mutation::DeleteScenario { deck, scenario } => {
                self.set_active(deck, scenario, false);
                if self
                    .editing
                    .as_ref()
                    .is_some_and(|session| session.deck == *deck && session.scenario == *scenario)
                {
                    self.editing = None;
                }
            }
            _ => {}
        }
    }

    /// Drop everything keyed to a deleted deck.
    fn forget_deck(&mut self, deck_id: &str) {
        self.active.remove(deck_id);
        if self.editing.as_ref().is_some_and(|session| session.deck == deck_id) {
            self.editing = None;
        }
    }

    /// Bring the session in line with a deck list adopted from the ledger:
    /// decks and scenarios that no longer exist lose their edit session and
    /// visibility.
    pub fn reconcile(&mut self, decks: &[Deck]) {
        let exists = |deck_id: &str, scenario_id: &str| {
            decks
                .iter()
                .any(|deck| deck.id == deck_id && deck.scenario(scenario_id).is_some())
        };

        if let Some(session) = &self.editing {
            if !exists(&session.deck, &session.scenario) {
                log::warn!(
                    "Scenario {} in edit vanished from deck {}, discarding session",
                    session.scenario,
                    session.deck
                );
                self.editing = None;
            }
        }

        self.active.retain(|deck_id, set| {
            set.retain(|scenario_id| exists(deck_id, scenario_id));
            !set.is_empty()
        });
    }
}

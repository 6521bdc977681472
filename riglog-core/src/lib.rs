//! # riglog-core: Deck layout document model
//!
//! Shared by the ledger, the sync engine and the layout helpers.
//!
//! ## Modules
//!
//! - [`model`]: Decks, placements, scenarios and the versioned envelope
//! - [`normalize`]: Lenient coercion of untrusted JSON into the model
//! - [`commands`]: Mutations issued by the gesture layer

pub mod commands;
pub mod model;
pub mod normalize;

pub use commands::{
    apply_mutation, CommandError, ItemEdit, Mutation, MutationOutcome, NewItem, NewZone, Origin,
    PlacementEdit, ZoneEdit,
};
pub use model::{
    Attachment, Deck, HistoryRecord, ItemPlacement, Placement, PlacementBase, PlanningScenario,
    Shape, StateEnvelope, ZonePlacement,
};
pub use normalize::{normalize_deck, normalize_placement, normalize_scenario};

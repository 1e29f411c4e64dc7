//! State - Reduced Console State
//!
//! Each slice reduces the shared action stream independently; the store owns
//! the root [`ConsoleState`].

pub mod console_state;
pub mod entity_state;
pub mod events_state;
pub mod status_state;

pub use console_state::{ConsoleState, Page};
pub use entity_state::{CollectionSpec, EntityStore, ListResult, PaginatedCollection};
pub use events_state::{EventsState, StreamState, StreamStatus};
pub use status_state::StatusState;

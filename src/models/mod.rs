pub mod character;
pub mod conflict;
pub mod graph;
pub mod ids;
pub mod relationship;

pub use character::{slug_id, Character};
pub use conflict::{Conflict, ConflictPhase, ConflictScope, ConflictSubject};
pub use graph::{DanglingReference, NarrativeGraph, SharedGraph, MAX_STRENGTH, MIN_STRENGTH};
pub use ids::{CharacterId, ConflictId, RelationshipId};
pub use relationship::{Relationship, RelationshipType};

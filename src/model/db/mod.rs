//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in a DB-friendly way, e.g.:
//!
//! - Natural keys (email, slug, counter value) are stored as `_id`.
//! - Datetimes are serialised in MongoDB's own format.

mod candidate;
pub use candidate::{placeholder_image, Candidate, CandidateCore, NewCandidate, DEFAULT_BIO};

mod position;
pub use position::Position;

mod settings;
pub use settings::{ElectionSettings, InvalidWindow, SETTINGS_ID};

mod voter;
pub use voter::Voter;

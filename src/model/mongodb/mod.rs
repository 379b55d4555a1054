mod bson;
mod collection;
mod counter;
pub mod errors;

pub use bson::optional_datetime;
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{ensure_candidate_id_counter_exists, Counter, CANDIDATE_ID_COUNTER};

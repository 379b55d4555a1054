use log::debug;
use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Coll;

pub const CANDIDATE_ID_COUNTER: &str = "candidate_id";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    pub next: u32,
}

impl Counter {
    /// Atomically retrieve the next value of the counter with the given ID,
    /// or `None` if no such counter exists.
    pub async fn next(counters: &Coll<Counter>, id: &str) -> Result<Option<u32>, DbError> {
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let counter = counters
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?;
        Ok(counter.map(|counter| counter.next))
    }
}

/// Ensure that the candidate ID counter exists, starting from 1.
///
/// This operation is idempotent.
pub async fn ensure_candidate_id_counter_exists(counters: &Coll<Counter>) -> Result<(), DbError> {
    debug!("Ensuring candidate ID counter exists");
    let options = UpdateOptions::builder().upsert(true).build();
    counters
        .update_one(
            doc! { "_id": CANDIDATE_ID_COUNTER },
            doc! { "$setOnInsert": { "next": 1_i64 } },
            options,
        )
        .await?;
    Ok(())
}

use std::collections::BTreeMap;

use chrono::Utc;
use rocket::{serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        catalog::{CandidateDesc, PositionDesc},
        results::ElectionResults,
        settings::ElectionDesc,
    },
    common::CandidateId,
};
use crate::store::Store;

pub fn routes() -> Vec<Route> {
    routes![
        get_positions,
        get_candidates,
        get_candidate,
        get_election,
        get_results,
        get_tallies,
    ]
}

#[get("/positions")]
async fn get_positions(store: Store) -> Result<Json<Vec<PositionDesc>>> {
    let positions = store.positions().await?;
    Ok(Json(positions.into_iter().map(Into::into).collect()))
}

/// All candidates, optionally only those standing for one position.
#[get("/candidates?<position>")]
async fn get_candidates(
    position: Option<&str>,
    store: Store,
) -> Result<Json<Vec<CandidateDesc>>> {
    let candidates = store
        .candidates()
        .await?
        .into_iter()
        .filter(|c| position.map_or(true, |p| c.position.as_str() == p))
        .map(Into::into)
        .collect();
    Ok(Json(candidates))
}

#[get("/candidates/<candidate_id>")]
async fn get_candidate(candidate_id: CandidateId, store: Store) -> Result<Json<CandidateDesc>> {
    let candidate = store
        .candidate(candidate_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;
    Ok(Json(candidate.into()))
}

#[get("/election")]
async fn get_election(store: Store) -> Result<Json<ElectionDesc>> {
    let settings = store.settings().await?;
    Ok(Json(ElectionDesc::at(&settings, Utc::now())))
}

/// Live results, grouped by position.
#[get("/results")]
async fn get_results(store: Store) -> Result<Json<ElectionResults>> {
    let positions = store.positions().await?;
    let candidates = store.candidates().await?;
    Ok(Json(ElectionResults::tabulate(positions, &candidates)))
}

/// The raw vote count of every candidate.
#[get("/results/tallies")]
async fn get_tallies(store: Store) -> Result<Json<BTreeMap<CandidateId, u64>>> {
    let tallies = store.tallies().await?;
    Ok(Json(tallies.into_iter().collect()))
}

use chrono::Utc;
use log::info;
use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    logging::RequestId,
    model::{
        api::{auth::AuthToken, ballot::Selection, voter::VoterDesc},
        db::Voter,
    },
    store::Store,
    voting::{cast_vote, VoteReceipt},
    Config,
};

use super::common::voter_for_token;

pub fn routes() -> Vec<Route> {
    routes![get_voter, submit_ballot]
}

#[get("/voter")]
async fn get_voter(token: AuthToken<Voter>, store: Store) -> Result<Json<VoterDesc>> {
    let voter = voter_for_token(&token, &*store).await?;
    Ok(Json(voter.into()))
}

/// Cast the signed-in voter's ballot: one selection per position.
#[post("/voter/ballot", data = "<selections>", format = "json")]
async fn submit_ballot(
    token: AuthToken<Voter>,
    selections: Json<Vec<Selection>>,
    store: Store,
    config: &State<Config>,
    request_id: &RequestId,
) -> Result<Json<VoteReceipt>> {
    let voter = voter_for_token(&token, &*store).await?;
    info!(
        "[{request_id}] {} submitted a ballot with {} selection(s)",
        voter.id,
        selections.len()
    );

    let receipt = cast_vote(
        &*store,
        &config.vote_policy(),
        &voter.id,
        &selections,
        Utc::now,
    )
    .await?;
    Ok(Json(receipt))
}

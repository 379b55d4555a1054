use std::sync::Arc;

use chrono::Utc;
use log::info;
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::{Admin, AuthToken, Registration},
            catalog::{CandidateDesc, CandidateSpec, PositionDesc, PositionSpec},
            results::{ElectionReport, ElectionResults, Turnout},
            settings::{ElectionDesc, ElectionSettingsSpec},
            voter::{CreatedVoter, RegistrationOutcome, VoterEdit, VoterRecord},
        },
        common::{CandidateId, PositionId, VoterId},
        db::{ElectionSettings, Position},
    },
    notify::Notifier,
    store::{Store, VoterUpdate},
};

use super::common::{create_voter, deliver_code};

pub fn routes() -> Vec<Route> {
    routes![
        get_voters,
        add_voter,
        edit_voter,
        delete_voter,
        resend_code,
        create_position,
        rename_position,
        delete_position,
        create_candidate,
        edit_candidate,
        delete_candidate,
        set_election,
        get_report,
    ]
}

#[get("/admin/voters")]
async fn get_voters(_token: AuthToken<Admin>, store: Store) -> Result<Json<Vec<VoterRecord>>> {
    let voters = store.voters().await?;
    Ok(Json(voters.into_iter().map(Into::into).collect()))
}

/// Register a voter on their behalf. The login code is returned as well as emailed.
#[post("/admin/voters", data = "<registration>", format = "json")]
async fn add_voter(
    _token: AuthToken<Admin>,
    registration: Json<Registration>,
    store: Store,
    notifier: &State<Arc<dyn Notifier>>,
) -> Result<Json<CreatedVoter>> {
    let Registration { email, name } = registration.0;
    let voter = create_voter(&*store, email, &name).await?;
    info!("Administrator registered voter {}", voter.id);

    let (code_sent, message) = deliver_code(&**notifier.inner(), &voter).await;
    Ok(Json(CreatedVoter {
        voter: voter.into(),
        code_sent,
        message,
    }))
}

#[put("/admin/voters/<voter_id>", data = "<edit>", format = "json")]
async fn edit_voter(
    _token: AuthToken<Admin>,
    voter_id: VoterId,
    edit: Json<VoterEdit>,
    store: Store,
) -> Result<Json<VoterRecord>> {
    let voter = store
        .voter(&voter_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
    let VoterEdit {
        name,
        status,
        expected_status,
    } = edit.0;

    // Judge the transition from the status the administrator saw.
    let expected_status = expected_status.unwrap_or(voter.status);
    let status = match status {
        Some(target) => expected_status.admin_transition(target)?,
        None => expected_status,
    };
    let name = match name {
        Some(name) if name.trim().is_empty() => {
            return Err(Error::bad_request("Voter name must not be empty"))
        }
        Some(name) => name.trim().to_string(),
        None => voter.name,
    };

    let update = VoterUpdate {
        name,
        status,
        expected_status,
    };
    if !store.update_voter(&voter_id, &update).await? {
        return Err(Error::not_found(format!("Voter {voter_id}")));
    }
    info!("Updated voter {voter_id}: status {status:?}");

    Ok(Json(VoterRecord {
        id: voter_id,
        name: update.name,
        status: update.status,
        login_code: voter.login_code,
    }))
}

#[delete("/admin/voters/<voter_id>")]
async fn delete_voter(_token: AuthToken<Admin>, voter_id: VoterId, store: Store) -> Result<()> {
    if store.delete_voter(&voter_id).await? {
        info!("Deleted voter {voter_id}");
        Ok(())
    } else {
        Err(Error::not_found(format!("Voter {voter_id}")))
    }
}

/// Email a voter their existing login code again.
#[post("/admin/voters/<voter_id>/code")]
async fn resend_code(
    _token: AuthToken<Admin>,
    voter_id: VoterId,
    store: Store,
    notifier: &State<Arc<dyn Notifier>>,
) -> Result<Json<RegistrationOutcome>> {
    let voter = store
        .voter(&voter_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
    let (code_sent, message) = deliver_code(&**notifier.inner(), &voter).await;
    Ok(Json(RegistrationOutcome {
        voter_id,
        code_sent,
        message,
    }))
}

#[post("/admin/positions", data = "<spec>", format = "json")]
async fn create_position(
    _token: AuthToken<Admin>,
    spec: Json<PositionSpec>,
    store: Store,
) -> Result<Json<PositionDesc>> {
    let position = Position::new(&spec.title).map_err(|e| Error::bad_request(e.to_string()))?;
    store.insert_position(&position).await?;
    info!("Created position {}", position.id);
    Ok(Json(position.into()))
}

/// Change a position's title. Its ID stays the same.
#[put("/admin/positions/<position_id>", data = "<spec>", format = "json")]
async fn rename_position(
    _token: AuthToken<Admin>,
    position_id: PositionId,
    spec: Json<PositionSpec>,
    store: Store,
) -> Result<Json<PositionDesc>> {
    let title = spec.title.trim();
    if title.is_empty() {
        return Err(Error::bad_request("Position title must not be empty"));
    }
    if !store.rename_position(&position_id, title).await? {
        return Err(Error::not_found(format!("Position {position_id}")));
    }
    Ok(Json(PositionDesc {
        id: position_id,
        title: title.to_string(),
    }))
}

#[delete("/admin/positions/<position_id>")]
async fn delete_position(
    _token: AuthToken<Admin>,
    position_id: PositionId,
    store: Store,
) -> Result<()> {
    if store.delete_position(&position_id).await? {
        info!("Deleted position {position_id}");
        Ok(())
    } else {
        Err(Error::not_found(format!("Position {position_id}")))
    }
}

#[post("/admin/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    _token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    store: Store,
) -> Result<Json<CandidateDesc>> {
    check_name(&spec.name)?;
    let candidate = store.insert_candidate(&spec.0.into_core(None)).await?;
    info!("Created candidate {} for {}", candidate.id, candidate.position);
    Ok(Json(candidate.into()))
}

/// Edit a candidate's profile. Their tally is left alone.
#[put("/admin/candidates/<candidate_id>", data = "<spec>", format = "json")]
async fn edit_candidate(
    _token: AuthToken<Admin>,
    candidate_id: CandidateId,
    spec: Json<CandidateSpec>,
    store: Store,
) -> Result<Json<CandidateDesc>> {
    check_name(&spec.name)?;
    let mut candidate = store
        .candidate(candidate_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;

    let core = spec.0.into_core(Some(&candidate));
    if !store.update_candidate(candidate_id, &core).await? {
        return Err(Error::not_found(format!("Candidate {candidate_id}")));
    }
    candidate.candidate = core;
    Ok(Json(candidate.into()))
}

#[delete("/admin/candidates/<candidate_id>")]
async fn delete_candidate(
    _token: AuthToken<Admin>,
    candidate_id: CandidateId,
    store: Store,
) -> Result<()> {
    if store.delete_candidate(candidate_id).await? {
        info!("Deleted candidate {candidate_id}");
        Ok(())
    } else {
        Err(Error::not_found(format!("Candidate {candidate_id}")))
    }
}

/// Set the voting window.
#[put("/admin/election", data = "<spec>", format = "json")]
async fn set_election(
    _token: AuthToken<Admin>,
    spec: Json<ElectionSettingsSpec>,
    store: Store,
) -> Result<Json<ElectionDesc>> {
    let settings = ElectionSettings::try_from(spec.0)?;
    store.set_settings(&settings).await?;
    info!(
        "Voting window set to {:?} - {:?}",
        settings.start_time(),
        settings.end_time()
    );
    Ok(Json(ElectionDesc::at(&settings, Utc::now())))
}

#[get("/admin/report")]
async fn get_report(_token: AuthToken<Admin>, store: Store) -> Result<Json<ElectionReport>> {
    let voters = store.voters().await?;
    let positions = store.positions().await?;
    let candidates = store.candidates().await?;

    let turnout = Turnout::count(&voters);
    let voted = voters
        .into_iter()
        .filter(|voter| voter.status.has_voted())
        .map(Into::into)
        .collect();
    Ok(Json(ElectionReport {
        turnout,
        results: ElectionResults::tabulate(positions, &candidates),
        voted,
    }))
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(Error::Status(
            Status::BadRequest,
            "Candidate name must not be empty".to_string(),
        ))
    } else {
        Ok(())
    }
}

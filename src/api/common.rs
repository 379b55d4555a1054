use log::warn;
use rocket::http::Status;

use crate::error::{Error, Result};
use crate::model::{
    api::auth::AuthToken,
    common::VoterId,
    db::Voter,
};
use crate::notify::Notifier;
use crate::store::{ElectionStore, StoreError};

/// How many fresh login codes to try before giving up on a registration.
/// Collisions are vanishingly rare, so hitting this means something is wrong.
const MAX_CODE_ATTEMPTS: u32 = 3;

/// Register a new eligible voter with a unique login code.
pub async fn create_voter(store: &dyn ElectionStore, id: VoterId, name: &str) -> Result<Voter> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::bad_request("Voter name must not be empty"));
    }
    let already_registered =
        || Error::Status(Status::Conflict, format!("Voter {id} is already registered"));
    if store.voter(&id).await?.is_some() {
        return Err(already_registered());
    }

    for _ in 0..MAX_CODE_ATTEMPTS {
        let voter = Voter::new(id.clone(), name);
        match store.insert_voter(&voter).await {
            Ok(()) => return Ok(voter),
            Err(StoreError::Duplicate(_)) => {
                if store.voter(&id).await?.is_some() {
                    return Err(already_registered());
                }
                warn!("Login code collision while registering {id}, generating another");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Status(
        Status::InternalServerError,
        format!("Could not generate a unique login code for {id}"),
    ))
}

/// Send a voter their login code. Delivery failure is reported rather than
/// raised, since the voter record is still valid.
pub async fn deliver_code(notifier: &dyn Notifier, voter: &Voter) -> (bool, String) {
    match notifier
        .send_login_code(&voter.id, &voter.name, &voter.login_code)
        .await
    {
        Ok(()) => (true, format!("Successfully sent login code to {}", voter.id)),
        Err(e) => {
            warn!("Failed to send login code to {}: {e}", voter.id);
            (false, e.to_string())
        }
    }
}

/// Look up the voter a token belongs to.
pub async fn voter_for_token(token: &AuthToken<Voter>, store: &dyn ElectionStore) -> Result<Voter> {
    let id = token
        .voter_id()
        .ok_or_else(|| Error::unauthorized("Not signed in as a voter"))?;
    store
        .voter(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {id}")))
}

use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::error;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{common::StatusTransitionError, db::InvalidWindow};
use crate::store::StoreError;
use crate::voting::VoteError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    StatusTransition(#[from] StatusTransitionError),
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    pub fn bad_request(why: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, why.into())
    }

    pub fn unauthorized(why: impl Into<String>) -> Self {
        Self::Status(Status::Unauthorized, why.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Store(e) => store_status(e),
            Self::Vote(e) => match e {
                VoteError::VotingClosed(_) | VoteError::NotEligible => Status::Forbidden,
                VoteError::AlreadyVoted => Status::Conflict,
                VoteError::IncompleteBallot { .. }
                | VoteError::InvalidSelection { .. }
                | VoteError::DuplicateSelection { .. } => Status::UnprocessableEntity,
                VoteError::VoteFailed { .. } => Status::ServiceUnavailable,
                VoteError::UnknownVoter(_) => Status::NotFound,
                VoteError::Store(e) => store_status(e),
            },
            Self::Jwt(e) => match e.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Argon2(_) => Status::InternalServerError,
            Self::StatusTransition(_) => Status::Conflict,
            Self::InvalidWindow(_) => Status::BadRequest,
            Self::Status(status, _) => *status,
        }
    }

    /// A stable name for this kind of error, for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(e) => store_kind(e),
            Self::Vote(VoteError::Store(e)) => store_kind(e),
            Self::Vote(e) => e.kind(),
            Self::Jwt(_) => "InvalidToken",
            Self::Argon2(_) => "InternalError",
            Self::StatusTransition(_) => "StatusTransition",
            Self::InvalidWindow(_) => "InvalidWindow",
            Self::Status(status, _) => status.reason().unwrap_or("Error"),
        }
    }
}

fn store_status(err: &StoreError) -> Status {
    match err {
        StoreError::Db(_) | StoreError::Corrupt(_) => Status::InternalServerError,
        StoreError::Conflict | StoreError::Duplicate(_) | StoreError::PositionInUse(_) => {
            Status::Conflict
        }
        StoreError::UnknownPosition(_) => Status::UnprocessableEntity,
    }
}

fn store_kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::Db(_) | StoreError::Corrupt(_) => "InternalError",
        StoreError::Conflict => "Conflict",
        StoreError::Duplicate(_) => "Duplicate",
        StoreError::PositionInUse(_) => "PositionInUse",
        StoreError::UnknownPosition(_) => "UnknownPosition",
    }
}

/// The JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = if status.code >= 500 {
            // Don't leak internals to clients.
            error!("{} {}: {self}", req.method(), req.uri());
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            error: self.kind().to_string(),
            message,
        };
        (status, Json(body)).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::common::WindowState;

    #[test]
    fn vote_errors_map_to_statuses() {
        let cases = [
            (VoteError::VotingClosed(WindowState::Closed), Status::Forbidden),
            (VoteError::NotEligible, Status::Forbidden),
            (VoteError::AlreadyVoted, Status::Conflict),
            (
                VoteError::IncompleteBallot { missing: vec![] },
                Status::UnprocessableEntity,
            ),
            (VoteError::VoteFailed { attempts: 5 }, Status::ServiceUnavailable),
        ];
        for (err, status) in cases {
            assert_eq!(Error::from(err).status(), status);
        }
    }

    #[test]
    fn store_failures_inside_votes_are_internal() {
        let err = Error::from(VoteError::Store(StoreError::Corrupt("oops".into())));
        assert_eq!(err.status(), Status::InternalServerError);
        assert_eq!(err.kind(), "InternalError");
    }
}

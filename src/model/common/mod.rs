mod ids;
mod login_code;
mod voter_status;
mod window;

pub use ids::{CandidateId, EmptyTitle, PositionId, VoterId, VoterIdError};
pub use login_code::{LoginCode, LoginCodeError};
pub use voter_status::{StatusTransitionError, VoterStatus};
pub use window::WindowState;

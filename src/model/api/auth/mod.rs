mod request;
mod token;
mod user;

pub use request::{AdminCredentials, Registration, VoterLogin};
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Admin, Rights, User};

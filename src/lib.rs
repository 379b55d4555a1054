#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod store;
pub mod voting;

pub use config::Config;

use config::{ConfigFairing, StoreFairing};
use logging::LoggerFairing;
use notify::NotifierFairing;

/// Build the server, connecting to whichever store is configured on ignition.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
        .attach(StoreFairing)
        .attach(NotifierFairing)
}

/// Routes and fairings common to the real server and tests.
fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
}

#[cfg(test)]
pub(crate) const TEST_ADMIN_USERNAME: &str = "returning-officer";

#[cfg(test)]
pub(crate) const TEST_ADMIN_PASSWORD: &str = "correct horse battery";

/// A server backed by the given store, with test credentials and a notifier
/// that only logs.
#[cfg(test)]
pub(crate) fn test_rocket(store: store::Store) -> Rocket<Build> {
    use std::sync::Arc;

    let password_hash = argon2::hash_encoded(
        TEST_ADMIN_PASSWORD.as_bytes(),
        b"election-test-salt",
        &argon2::Config::default(),
    )
    .unwrap();
    let figment = rocket::Config::figment()
        .merge(("jwt_secret", "test-jwt-secret"))
        .merge(("auth_ttl", 3600))
        .merge(("admin_username", TEST_ADMIN_USERNAME))
        .merge(("admin_password_hash", password_hash))
        .merge(("vote_backoff_ms", 1));
    let notifier: Arc<dyn notify::Notifier> = Arc::new(notify::LogNotifier);

    assemble(rocket::custom(figment))
        .manage(store)
        .manage(notifier)
}

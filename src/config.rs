use std::time::Duration as StdDuration;

use argon2::Error as Argon2Error;
use chrono::Duration;
use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::store::{MemoryStore, MongoStore, Store};
use crate::voting::{EmptyPositionRule, VotePolicy};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    admin_username: String,
    #[serde(default = "default_vote_max_attempts")]
    vote_max_attempts: u32,
    #[serde(default = "default_vote_backoff_ms")]
    vote_backoff_ms: u64,
    #[serde(default)]
    empty_position_rule: EmptyPositionRule,
    // secrets
    jwt_secret: String,
    admin_password_hash: String,
}

fn default_vote_max_attempts() -> u32 {
    5
}

fn default_vote_backoff_ms() -> u64 {
    20
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to encrypt JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    pub fn admin_username(&self) -> &str {
        &self.admin_username
    }

    /// Check administrator credentials against the configured argon2 hash.
    pub fn verify_admin(&self, username: &str, password: &str) -> Result<bool, Argon2Error> {
        if username != self.admin_username {
            return Ok(false);
        }
        argon2::verify_encoded(&self.admin_password_hash, password.as_bytes())
    }

    /// How ballots are validated and retried.
    pub fn vote_policy(&self) -> VotePolicy {
        VotePolicy::new(
            self.vote_max_attempts,
            StdDuration::from_millis(self.vote_backoff_ms),
            self.empty_position_rule,
        )
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Where election data lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StorageKind {
    #[default]
    Mongodb,
    /// Nothing survives a restart.
    Memory,
}

/// Configuration for the store.
#[derive(Deserialize)]
struct StoreConfig {
    // non-secrets
    #[serde(default)]
    storage: StorageKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: Option<String>,
}

fn default_db_name() -> String {
    "election".to_string()
}

/// A fairing that loads the store config, connects to the store, performs
/// any setup necessary, and places a [`Store`] into managed state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store = match config.storage {
            StorageKind::Memory => {
                warn!("Using in-memory storage, all data will be lost on shutdown");
                Store::new(MemoryStore::new())
            }
            StorageKind::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set when `storage` is \"mongodb\"");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&db_uri, &config.db_name).await {
                    Ok(store) => Store::new(store),
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };
        info!("...store online!");

        // Manage the state.
        rocket = rocket.manage(store);
        Ok(rocket)
    }
}

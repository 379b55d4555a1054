//! Delivering login codes to voters.

use std::sync::Arc;

use log::{error, info, warn};
use reqwest::Client as HttpClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::common::{LoginCode, VoterId};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const SUBJECT: &str = "Your Student Government Election Login Code";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to contact the mail service: {0}")]
    Http(#[from] reqwest::Error),
    /// The mail service refused the message.
    #[error("{0}")]
    Rejected(String),
}

/// Something that can tell a voter their login code.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_login_code(
        &self,
        to: &VoterId,
        name: &str,
        code: &LoginCode,
    ) -> Result<(), NotifyError>;
}

/// Sends login codes by email through the SendGrid v3 API.
pub struct SendGridNotifier {
    http: HttpClient,
    api_key: String,
    sender: String,
}

impl SendGridNotifier {
    pub fn new(api_key: String, sender: String) -> Self {
        Self {
            http: HttpClient::new(),
            api_key,
            sender,
        }
    }
}

#[derive(Serialize)]
struct Mail<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content; 2],
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct Content {
    #[serde(rename = "type")]
    mime: &'static str,
    value: String,
}

/// SendGrid's error body.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorMessage>,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

fn mail_body(code: &LoginCode) -> [Content; 2] {
    [
        Content {
            mime: "text/plain",
            value: format!("Your unique login code is: {code}"),
        },
        Content {
            mime: "text/html",
            value: format!(
                "<p>Hello,</p>\
                 <p>Thank you for registering to vote in the student government election.</p>\
                 <p>Your unique login code is: <strong>{code}</strong></p>\
                 <p>Please use this code to log in and cast your vote.</p>"
            ),
        },
    ]
}

#[rocket::async_trait]
impl Notifier for SendGridNotifier {
    async fn send_login_code(
        &self,
        to: &VoterId,
        name: &str,
        code: &LoginCode,
    ) -> Result<(), NotifyError> {
        let mail = Mail {
            personalizations: [Personalization {
                to: [Address {
                    email: to.as_str(),
                    name: Some(name),
                }],
            }],
            from: Address {
                email: &self.sender,
                name: None,
            },
            subject: SUBJECT,
            content: mail_body(code),
        };
        let response = self
            .http
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&mail)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Sent login code to {to}");
            return Ok(());
        }
        let reason = match response.json::<ErrorBody>().await {
            Ok(body) if !body.errors.is_empty() => body
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join(", "),
            _ => format!("Mail service responded with {status}"),
        };
        Err(NotifyError::Rejected(reason))
    }
}

/// Writes login codes to the log instead of sending them. For development
/// servers with no mail credentials.
pub struct LogNotifier;

#[rocket::async_trait]
impl Notifier for LogNotifier {
    async fn send_login_code(
        &self,
        to: &VoterId,
        _name: &str,
        code: &LoginCode,
    ) -> Result<(), NotifyError> {
        info!("Login code for {to}: {code}");
        Ok(())
    }
}

/// Configuration for outgoing mail. Both keys must be set to send real email.
#[derive(Deserialize)]
struct MailConfig {
    // non-secrets
    mail_sender: Option<String>,
    // secrets
    sendgrid_api_key: Option<String>,
}

/// A fairing that picks a notifier and places it into managed state as
/// `Arc<dyn Notifier>`.
pub struct NotifierFairing;

#[rocket::async_trait]
impl Fairing for NotifierFairing {
    fn info(&self) -> Info {
        Info {
            name: "Notifier",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<MailConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load mail config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let notifier: Arc<dyn Notifier> = match (config.sendgrid_api_key, config.mail_sender) {
            (Some(key), Some(sender)) => {
                info!("Sending login codes by email from {sender}");
                Arc::new(SendGridNotifier::new(key, sender))
            }
            _ => {
                warn!("`sendgrid_api_key` or `mail_sender` not set, login codes will only be logged");
                Arc::new(LogNotifier)
            }
        };
        Ok(rocket.manage(notifier))
    }
}

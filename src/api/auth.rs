use std::sync::Arc;

use log::info;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::{Admin, AdminCredentials, AuthToken, Registration, VoterLogin, AUTH_TOKEN_COOKIE},
            voter::{RegistrationOutcome, VoterDesc},
        },
        db::Voter,
    },
    notify::Notifier,
    store::Store,
    Config,
};

use super::common::{create_voter, deliver_code};

pub fn routes() -> Vec<Route> {
    routes![
        register,
        authenticate_voter,
        authenticate_admin,
        check_admin,
        check_voter,
        check_unauthenticated,
        logout,
    ]
}

#[post("/auth/register", data = "<registration>", format = "json")]
async fn register(
    registration: Json<Registration>,
    store: Store,
    notifier: &State<Arc<dyn Notifier>>,
) -> Result<Json<RegistrationOutcome>> {
    let Registration { email, name } = registration.0;
    let voter = create_voter(&*store, email, &name).await?;
    info!("Registered voter {}", voter.id);

    let (code_sent, message) = deliver_code(&**notifier.inner(), &voter).await;
    Ok(Json(RegistrationOutcome {
        voter_id: voter.id,
        code_sent,
        message,
    }))
}

#[post("/auth/voter", data = "<login>", format = "json")]
async fn authenticate_voter(
    cookies: &CookieJar<'_>,
    login: Json<VoterLogin>,
    store: Store,
    config: &State<Config>,
) -> Result<Json<VoterDesc>> {
    let voter = store
        .voter_by_code(&login.code)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid login code"))?;

    let token = AuthToken::new(&voter);
    cookies.add(token.into_cookie(config));

    Ok(Json(voter.into()))
}

#[post("/auth/admin", data = "<credentials>", format = "json")]
async fn authenticate_admin(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    config: &State<Config>,
) -> Result<()> {
    if !config.verify_admin(&credentials.username, &credentials.password)? {
        return Err(Error::unauthorized(
            "No admin found with the provided username and password combination.",
        ));
    }

    let admin = Admin {
        username: credentials.0.username,
    };
    let token = AuthToken::new(&admin);
    cookies.add(token.into_cookie(config));

    Ok(())
}

#[get("/auth/check", rank = 1)]
fn check_admin(_token: AuthToken<Admin>) -> &'static str {
    "Admin"
}

#[get("/auth/check", rank = 2)]
fn check_voter(_token: AuthToken<Voter>) -> &'static str {
    "Voter"
}

#[get("/auth/check", rank = 3)]
fn check_unauthenticated() -> &'static str {
    "Unauthenticated"
}

#[delete("/auth")]
fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::ContentType,
        local::asynchronous::Client,
        serde::json::serde_json::json,
    };

    use super::*;
    use crate::error::ErrorBody;
    use crate::model::common::VoterStatus;

    #[backend_test]
    async fn admin_authenticate_valid(client: Client) {
        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::example()).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.get(uri!(check_admin)).dispatch().await;
        assert_eq!(Some("Admin".to_string()), response.into_string().await);
    }

    #[backend_test]
    async fn admin_authenticate_invalid(client: Client) {
        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": crate::TEST_ADMIN_USERNAME,
                    "password": "wrong",
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "someone-else",
                    "password": crate::TEST_ADMIN_PASSWORD,
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn voter_authenticate(client: Client, store: Store) {
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();

        // Codes are accepted in any case.
        let code = voter.login_code.to_string().to_lowercase();
        let response = client
            .post(uri!(authenticate_voter))
            .header(ContentType::JSON)
            .body(json!({ "code": code }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let desc = response.into_json::<VoterDesc>().await.unwrap();
        assert_eq!(desc.id, voter.id);
        assert_eq!(desc.status, VoterStatus::Eligible);
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.get(uri!(check_voter)).dispatch().await;
        assert_eq!(Some("Voter".to_string()), response.into_string().await);
    }

    #[backend_test]
    async fn voter_authenticate_unknown_code(client: Client, store: Store) {
        store.insert_voter(&Voter::example()).await.unwrap();

        let response = client
            .post(uri!(authenticate_voter))
            .header(ContentType::JSON)
            .body(json!({ "code": "VOTE000000" }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn deleted_voters_are_signed_out(client: Client, store: Store) {
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();
        client
            .post(uri!(authenticate_voter))
            .header(ContentType::JSON)
            .body(json!({ "code": voter.login_code }).to_string())
            .dispatch()
            .await;

        store.delete_voter(&voter.id).await.unwrap();

        let response = client.get(uri!(check_voter)).dispatch().await;
        assert_eq!(Some("Unauthenticated".to_string()), response.into_string().await);
    }

    #[backend_test]
    async fn registration(client: Client, store: Store) {
        let response = client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(json!({ "email": "  Carol@Uni.edu", "name": "Carol" }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let outcome = response.into_json::<RegistrationOutcome>().await.unwrap();
        assert!(outcome.code_sent);
        assert_eq!(outcome.voter_id.as_str(), "carol@uni.edu");

        let voter = store.voter(&outcome.voter_id).await.unwrap().unwrap();
        assert_eq!(voter.name, "Carol");
        assert_eq!(voter.status, VoterStatus::Eligible);
        assert!(voter.login_code.as_str().starts_with("VOTE"));

        // The same email cannot register twice.
        let response = client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(json!({ "email": "carol@uni.edu", "name": "Carol Again" }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Conflict, response.status());
        let body = response.into_json::<ErrorBody>().await.unwrap();
        assert!(body.message.contains("already registered"));
    }

    #[backend_test(voter)]
    async fn logout_clears_cookie(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        let response = client.get(uri!(check_unauthenticated)).dispatch().await;
        assert_eq!(Some("Unauthenticated".to_string()), response.into_string().await);
    }
}

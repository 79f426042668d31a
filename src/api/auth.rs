use rocket::{http::CookieJar, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::auth::IdentityAssertion,
    auth::{Admin, AuthToken, Rights},
    db::voter::Voter,
    mongodb::Coll,
};

pub fn routes() -> Vec<Route> {
    routes![create_session]
}

/// Exchange a signed identity assertion from the sign-on subsystem for an
/// auth token cookie. Sign-in itself (passwords, resets, registration) is
/// that subsystem's problem; the engine only trusts its signature.
#[post("/auth/sessions", data = "<assertion>", format = "json")]
pub(crate) async fn create_session(
    assertion: Json<IdentityAssertion>,
    config: &State<Config>,
    voters: Coll<Voter>,
    cookies: &CookieJar<'_>,
) -> Result<rocket::http::Status> {
    let assertion = assertion.0;
    if !assertion.verify(config) {
        return Err(Error::forbidden("Invalid identity assertion"));
    }

    let cookie = match assertion.rights {
        Rights::Voter => {
            // The subject must exist on the roster.
            let voter = voters
                .find_one(assertion.subject.as_doc(), None)
                .await?
                .ok_or_else(|| Error::not_found(format!("Voter {}", assertion.subject)))?;
            AuthToken::new(&voter).into_cookie(config)
        }
        Rights::Admin => {
            let admin = Admin {
                id: assertion.subject,
            };
            AuthToken::new(&admin).into_cookie(config)
        }
    };
    cookies.add(cookie);

    Ok(rocket::http::Status::NoContent)
}

use std::fmt::Display;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// 400: malformed input, a closed window, or a state conflict the
    /// caller can resolve by re-fetching the ballot.
    pub fn bad_request(msg: impl Display) -> Self {
        Self::Status(Status::BadRequest, msg.to_string())
    }

    /// 403: the caller is not allowed to touch this resource.
    pub fn forbidden(msg: impl Display) -> Self {
        Self::Status(Status::Forbidden, msg.to_string())
    }

    /// 404: `what` does not exist.
    pub fn not_found(what: impl Display) -> Self {
        Self::Status(Status::NotFound, format!("{} not found", what))
    }

    /// 409: lost a race against a concurrent request; retryable.
    pub fn conflict(msg: impl Display) -> Self {
        Self::Status(Status::Conflict, msg.to_string())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    /// Voter-facing errors respond with their status; internal causes are
    /// logged server-side and sanitized to a bare status code.
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::Status(status, msg) => {
                info!("{} {}: {}", status.code, status.reason_lossy(), msg);
                status
            }
            Self::Db(err) => {
                error!("Database error: {err}");
                Status::InternalServerError
            }
            Self::Jwt(err) => {
                warn!("Token error: {err}");
                match err.into_kind() {
                    JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                        Status::Unauthorized
                    }
                    _ => Status::BadRequest,
                }
            }
        })
    }
}

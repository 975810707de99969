use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};

use crate::server::errors::AuthFailure;

pub(crate) mod auth;
pub(crate) mod connections;
pub(crate) mod feed;
pub(crate) mod messages;
pub(crate) mod profile;
pub(crate) mod search;
pub(crate) mod updates;

/// `Json` body extractor whose rejections use the API error codes.
pub(crate) struct ApiJson<T>(pub(crate) T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AuthFailure;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(Self(value))
    }
}

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// JSON body that has passed its `validator` rules.
///
/// Unparseable bodies are 400. Rule violations, and bodies that parse but do not fit the
/// type, are 422 with the offending fields listed in `details`.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(reject_body)?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

fn reject_body(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            let mut errors = validator::ValidationErrors::new();
            errors.add(
                "body",
                validator::ValidationError::new("shape").with_message(e.body_text().into()),
            );
            AppError::ValidationError(errors)
        }
        other => AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", other.body_text())),
    }
}

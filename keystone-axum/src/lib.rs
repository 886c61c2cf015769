use axum::{
    async_trait,
    extract::{rejection::ExtensionRejection, FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json, RequestPartsExt,
};
use keystone::runtime::{RuntimeLevel, RuntimeLevelReason, RuntimeState};
use serde_json::json;
use tokio::sync::watch;
use tracing::warn;

/// The runtime state at the time the request came in.
///
/// Reads the `watch::Receiver<RuntimeState>` installed as an [`Extension`],
/// usually the one returned by `CoreRuntime::subscribe`.
#[derive(Debug, Clone)]
pub struct Runtime(pub RuntimeState);

#[async_trait]
impl<S> FromRequestParts<S> for Runtime
where
    S: Send + Sync,
{
    type Rejection = RuntimeRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(receiver) = parts
            .extract::<Extension<watch::Receiver<RuntimeState>>>()
            .await?;

        let state = receiver.borrow().clone();

        Ok(Self(state))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RuntimeRejection {
    #[error("{0}")]
    Extension(#[from] ExtensionRejection),

    #[error("{message}")]
    BootFailed {
        level: RuntimeLevel,
        reason: RuntimeLevelReason,
        message: String,
    },
}

impl RuntimeRejection {
    /// The rejection for a state holding a fatal boot error.
    pub fn from_state(state: &RuntimeState) -> Option<Self> {
        let err = state.boot_failed()?;

        Some(Self::BootFailed {
            level: state.level(),
            reason: err.reason,
            message: err.message.to_owned(),
        })
    }
}

impl IntoResponse for RuntimeRejection {
    fn into_response(self) -> Response {
        match self {
            RuntimeRejection::Extension(rejection) => rejection.into_response(),
            RuntimeRejection::BootFailed {
                level,
                reason,
                message,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "level": level,
                    "reason": reason,
                    "message": message,
                })),
            )
                .into_response(),
        }
    }
}

/// Answers every request with the boot diagnostic once a fatal boot error is
/// stored, passes requests through otherwise.
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(middleware::from_fn_with_state(runtime.subscribe(), boot_failed_guard));
/// ```
pub async fn boot_failed_guard(
    State(runtime): State<watch::Receiver<RuntimeState>>,
    request: Request,
    next: Next,
) -> Response {
    let rejection = RuntimeRejection::from_state(&runtime.borrow());

    match rejection {
        Some(rejection) => {
            warn!(uri = %request.uri(), error = %rejection, "request refused, boot failed");

            rejection.into_response()
        }
        None => next.run(request).await,
    }
}

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Extension, Router,
};
use keystone::{
    runtime::{LevelDecision, RuntimeLevel, RuntimeLevelReason, RuntimeState},
    BootFailedError,
};
use keystone_axum::{boot_failed_guard, Runtime};
use tokio::sync::watch;
use tower::ServiceExt;

async fn level(Runtime(state): Runtime) -> String {
    state.level().to_string()
}

fn app(runtime: watch::Receiver<RuntimeState>) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/level", get(level))
        .layer(middleware::from_fn_with_state(
            runtime.clone(),
            boot_failed_guard,
        ))
        .layer(Extension(runtime))
}

async fn get_body(app: &Router, uri: &str) -> anyhow::Result<(StatusCode, String)> {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await?;

    Ok((status, String::from_utf8(body.to_vec())?))
}

#[tokio::test]
async fn requests_pass_while_running() -> anyhow::Result<()> {
    let (sender, receiver) = watch::channel(RuntimeState::booting());
    sender.send_modify(|state| state.configure(RuntimeLevel::Run, RuntimeLevelReason::Run));
    let app = app(receiver);

    assert_eq!(get_body(&app, "/").await?, (StatusCode::OK, "ok".to_owned()));
    assert_eq!(
        get_body(&app, "/level").await?,
        (StatusCode::OK, "Run".to_owned())
    );

    Ok(())
}

#[tokio::test]
async fn fatal_boot_error_answers_every_request() -> anyhow::Result<()> {
    let (sender, receiver) = watch::channel(RuntimeState::booting());
    let app = app(receiver);

    sender.send_modify(|state| {
        state.fail(BootFailedError::new(
            RuntimeLevelReason::BootFailedCannotConnectToDatabase,
            "database unreachable",
        ))
    });

    for uri in ["/", "/level"] {
        let (status, body) = get_body(&app, uri).await?;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = serde_json::from_str(&body)?;
        assert_eq!(body["level"], "BootFailed");
        assert_eq!(body["reason"], "BootFailedCannotConnectToDatabase");
        assert_eq!(body["message"], "database unreachable");
    }

    Ok(())
}

#[tokio::test]
async fn missing_database_is_not_fatal() -> anyhow::Result<()> {
    let (sender, receiver) = watch::channel(RuntimeState::booting());
    sender.send_modify(|state| {
        state.apply(LevelDecision::new(
            RuntimeLevel::BootFailed,
            RuntimeLevelReason::InstallMissingDatabase,
        ))
    });
    let app = app(receiver);

    assert_eq!(
        get_body(&app, "/level").await?,
        (StatusCode::OK, "BootFailed".to_owned())
    );

    Ok(())
}

#[tokio::test]
async fn runtime_extractor_needs_the_extension() -> anyhow::Result<()> {
    let app = Router::new().route("/level", get(level));

    let (status, _) = get_body(&app, "/level").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    Ok(())
}

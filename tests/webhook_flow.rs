//! End-to-end flows through the HTTP router with the in-memory backend.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeDelta, Utc};
use http_body_util::BodyExt;
use linkgate_bot::bot::handlers::{
    CommandDeps, Reply, RESET_DONE_TEXT, VERIFY_FIRST_TEXT, VERIFY_LINK_TEXT,
};
use linkgate_bot::bot::UpdateDispatcher;
use linkgate_bot::config::{Settings, DEFAULT_VIDEO_CAPTION, DEFAULT_VIDEO_URL};
use linkgate_bot::server::{self, AppState, RUNNING_TEXT, VERIFIED_TEXT, WEBHOOK_ACK};
use linkgate_bot::shortener::GpLinksClient;
use linkgate_bot::storage::InMemoryStorage;
use linkgate_bot::testing::{text_update, RecordingSender};
use linkgate_bot::verification::VerificationService;
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::ChatId;
use tower::ServiceExt;

const TOKEN: &str = "123456:ABC-secret";
const ADMIN: i64 = 7;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Harness {
    app: Router,
    sender: Arc<RecordingSender>,
    verification: VerificationService,
}

fn harness() -> Result<Harness, Box<dyn std::error::Error>> {
    let verification = VerificationService::new(Arc::new(InMemoryStorage::new()));
    let deps = CommandDeps {
        verification: verification.clone(),
        shortener: Arc::new(GpLinksClient::new(
            "http://127.0.0.1:9/api",
            None,
            Duration::from_secs(1),
        )?),
        settings: Arc::new(Settings::with_defaults(TOKEN, ADMIN, "https://bot.example.com/")),
    };
    let sender = Arc::new(RecordingSender::new());
    let dispatcher = UpdateDispatcher::new(deps, sender.clone(), "gate_bot");
    Ok(Harness {
        app: server::router(AppState::new(dispatcher, TOKEN)),
        sender,
        verification,
    })
}

async fn call(app: &Router, request: Request<Body>) -> Result<(StatusCode, String), Box<dyn std::error::Error>> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8(body.to_vec())?))
}

async fn get(app: &Router, uri: &str) -> Result<(StatusCode, String), Box<dyn std::error::Error>> {
    call(app, Request::builder().uri(uri).body(Body::empty())?).await
}

async fn post_update(
    app: &Router,
    path: &str,
    body: impl Into<Body>,
) -> Result<(StatusCode, String), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(body.into())?;
    call(app, request).await
}

async fn send_command(h: &Harness, update_id: u32, user_id: i64, text: &str) -> TestResult {
    let body = text_update(update_id, user_id, text).to_string();
    let (status, ack) = post_update(&h.app, &format!("/{TOKEN}"), body).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, WEBHOOK_ACK);
    Ok(())
}

#[tokio::test]
async fn liveness_reports_running() -> TestResult {
    let h = harness()?;
    assert_eq!(get(&h.app, "/").await?, (StatusCode::OK, RUNNING_TEXT.to_string()));
    Ok(())
}

#[tokio::test]
async fn video_requires_completed_redirect() -> TestResult {
    let h = harness()?;

    send_command(&h, 1, 42, "/video").await?;
    assert_eq!(
        h.sender.take().await,
        vec![(ChatId(42), Reply::Text(VERIFY_FIRST_TEXT.to_string()))]
    );

    assert_eq!(
        get(&h.app, "/verify/42").await?,
        (StatusCode::OK, VERIFIED_TEXT.to_string())
    );

    send_command(&h, 2, 42, "/video").await?;
    assert_eq!(
        h.sender.take().await,
        vec![(
            ChatId(42),
            Reply::Video {
                url: DEFAULT_VIDEO_URL.to_string(),
                caption: DEFAULT_VIDEO_CAPTION.to_string(),
            }
        )]
    );

    let now = Utc::now();
    assert!(h.verification.is_verified_at(42, now + TimeDelta::minutes(1)).await?);
    assert!(!h.verification.is_verified_at(42, now + TimeDelta::minutes(181)).await?);
    Ok(())
}

#[tokio::test]
async fn verify_command_links_to_redirect_route() -> TestResult {
    let h = harness()?;

    send_command(&h, 1, 42, "/verify").await?;
    assert_eq!(
        h.sender.take().await,
        vec![(
            ChatId(42),
            Reply::Text(format!(
                "{VERIFY_LINK_TEXT}\nhttps://bot.example.com/verify/42"
            ))
        )]
    );
    Ok(())
}

#[tokio::test]
async fn admin_reset_revokes_everyone() -> TestResult {
    let h = harness()?;
    for user_id in [42, 99] {
        let (status, _) = get(&h.app, &format!("/verify/{user_id}")).await?;
        assert_eq!(status, StatusCode::OK);
    }

    send_command(&h, 1, 8, "/deletevideos").await?;
    assert!(h.sender.take().await.is_empty());
    assert!(h.verification.is_verified(42).await?);

    send_command(&h, 2, ADMIN, "/deletevideos").await?;
    assert_eq!(
        h.sender.take().await,
        vec![(ChatId(ADMIN), Reply::Text(RESET_DONE_TEXT.to_string()))]
    );
    assert!(!h.verification.is_verified(42).await?);
    assert!(!h.verification.is_verified(99).await?);

    send_command(&h, 3, 42, "/video").await?;
    assert_eq!(
        h.sender.take().await,
        vec![(ChatId(42), Reply::Text(VERIFY_FIRST_TEXT.to_string()))]
    );
    Ok(())
}

#[tokio::test]
async fn malformed_webhook_body_is_acknowledged() -> TestResult {
    let h = harness()?;

    let (status, ack) = post_update(&h.app, &format!("/{TOKEN}"), "{not json").await?;
    assert_eq!((status, ack.as_str()), (StatusCode::OK, WEBHOOK_ACK));
    assert!(h.sender.sent().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_webhook_path_is_not_found() -> TestResult {
    let h = harness()?;

    let body = text_update(1, 42, "/start").to_string();
    let (status, _) = post_update(&h.app, "/not-the-token", body).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.sender.sent().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn non_integer_user_id_is_rejected() -> TestResult {
    let h = harness()?;

    let (status, _) = get(&h.app, "/verify/abc").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!h.verification.is_verified(0).await?);
    Ok(())
}

#[tokio::test]
async fn unparseable_update_is_acknowledged() -> TestResult {
    let h = harness()?;

    let body = r#"{"update_id":1,"message":{"bogus":1}}"#;
    let (status, ack) = post_update(&h.app, &format!("/{TOKEN}"), body).await?;
    assert_eq!((status, ack.as_str()), (StatusCode::OK, WEBHOOK_ACK));
    assert!(h.sender.sent().await.is_empty());
    Ok(())
}

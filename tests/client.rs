//! Client against a live server on a random local port

use std::sync::{Arc, OnceLock};

use tempfile::TempDir;
use tokio::net::TcpListener;

use smsguard::classifier::dataset::Dataset;
use smsguard::classifier::ensemble::Label;
use smsguard::classifier::{Detector, DEFAULT_MAX_FEATURES};
use smsguard::client::{ImageFile, SessionStore, SmsGuardClient};
use smsguard::config::Config;
use smsguard::models::{PredictionQuery, ProfileUpdate};
use smsguard::{create_router, db, AppState};

fn detector() -> Arc<Detector> {
    static DETECTOR: OnceLock<Arc<Detector>> = OnceLock::new();
    DETECTOR
        .get_or_init(|| {
            let dataset = Dataset::seed().unwrap();
            Arc::new(Detector::train(&dataset, DEFAULT_MAX_FEATURES))
        })
        .clone()
}

/// Spawns the server and returns its base URL with the directory holding
/// uploads and session files.
async fn spawn_server() -> (String, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::for_testing();
    config.upload_dir = dir.path().join("uploads");

    let pool = db::create_pool(&config.database_url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let app = create_router(AppState::new(config, pool, detector()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), dir)
}

fn client(base_url: &str, dir: &TempDir, name: &str) -> SmsGuardClient {
    let session = SessionStore::new(dir.path().join(format!("{}.json", name)));
    SmsGuardClient::new(base_url, session).unwrap()
}

/// URL of a port nothing listens on.
async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (base_url, dir) = spawn_server().await;
    let client = client(&base_url, &dir, "alice");

    assert!(client.health().await.success);
    assert!(!client.is_authenticated());

    let response = client
        .register("alice", "alice@example.com", "secret123", "secret123")
        .await;
    assert!(response.success, "{:?}", response.error);
    assert!(client.is_authenticated());
    let stored = client.session().load().unwrap();
    assert_eq!(stored.user.unwrap().username, "alice");

    let prediction = client.predict("Are we still on for dinner tonight?").await;
    assert!(prediction.success, "{:?}", prediction.error);
    let result = prediction.data.unwrap();
    assert_eq!(result.model_results.len(), 5);
    let cached = client.session().load().unwrap().predictions;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, result.id);

    let feedback = client.submit_feedback(&result.id, result.weighted_result.prediction).await;
    assert!(feedback.success, "{:?}", feedback.error);
    assert_eq!(feedback.data, Some(Some(1.0)));

    let duplicate = client.submit_feedback(&result.id, Label::Spam).await;
    assert_eq!(
        duplicate.error.as_deref(),
        Some("Feedback already submitted for this prediction")
    );

    let page = client.predictions(&PredictionQuery::default()).await;
    assert_eq!(page.data.unwrap().pagination.total, 1);
    let csv = client.export_predictions(&PredictionQuery::default()).await;
    assert!(csv.data.unwrap().starts_with("Message,Prediction,Confidence,Timestamp"));

    let logout = client.logout().await;
    assert!(logout.success);
    assert!(!client.session().file_path().exists());

    let me = client.current_user().await;
    assert!(!me.success);
    assert_eq!(me.error.as_deref(), Some("Not logged in"));
}

#[tokio::test]
async fn test_login_errors_come_from_server() {
    let (base_url, dir) = spawn_server().await;
    let first = client(&base_url, &dir, "first");
    assert!(first.register("bob", "bob@example.com", "secret123", "secret123").await.success);

    let second = client(&base_url, &dir, "second");
    let response = second.login("bob", "not-the-password").await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Incorrect password. Please try again."));
    assert!(!second.is_authenticated());

    let response = second.login("bob@example.com", "secret123").await;
    assert!(response.success);
    assert!(second.is_authenticated());
}

#[tokio::test]
async fn test_unauthorized_clears_session_except_on_classification() {
    let (base_url, dir) = spawn_server().await;
    let client = client(&base_url, &dir, "carol");
    let auth = client
        .register("carol", "carol@example.com", "secret123", "secret123")
        .await
        .data
        .unwrap();

    client.session().set_auth("not-a-token", &auth.user).unwrap();

    let prediction = client.predict("hello there").await;
    assert!(!prediction.success);
    assert_eq!(prediction.error.as_deref(), Some("Invalid token"));
    assert!(client.is_authenticated());

    let stats = client.user_stats().await;
    assert!(!stats.success);
    assert!(!client.is_authenticated());
    assert!(!client.session().file_path().exists());
}

#[tokio::test]
async fn test_unreachable_server_keeps_session() {
    let (base_url, dir) = spawn_server().await;
    let online = client(&base_url, &dir, "frank");
    let auth = online
        .register("frank", "frank@example.com", "secret123", "secret123")
        .await
        .data
        .unwrap();

    let offline = client(&dead_url().await, &dir, "frank");
    assert!(offline.is_authenticated());
    let me = offline.current_user().await;
    assert!(!me.success);
    assert_eq!(me.error.as_deref(), Some("Network error. Please try again."));

    let stored = offline.session().load().unwrap();
    assert_eq!(stored.auth_token.as_deref(), Some(auth.token.as_str()));
    assert_eq!(stored.user.unwrap().username, "frank");

    let me = online.current_user().await;
    assert!(me.success, "{:?}", me.error);
    assert_eq!(me.data.unwrap().username, "frank");
}

#[tokio::test]
async fn test_profile_image_upload() {
    let (base_url, dir) = spawn_server().await;
    let client = client(&base_url, &dir, "dave");
    assert!(client.register("dave", "dave@example.com", "secret123", "secret123").await.success);

    let update = ProfileUpdate {
        bio: Some("Spam hunter".to_string()),
        ..Default::default()
    };
    let bytes = b"\x89PNG\r\n\x1a\nnot really an image".to_vec();
    let response = client
        .update_profile(
            &update,
            Some(ImageFile {
                file_name: "avatar.PNG".to_string(),
                bytes: bytes.clone(),
            }),
        )
        .await;
    assert!(response.success, "{:?}", response.error);
    let user = response.data.unwrap();
    assert_eq!(user.bio.as_deref(), Some("Spam hunter"));
    let image_url = user.profile_image.unwrap();
    assert!(image_url.starts_with("/uploads/profile_images/"));
    assert!(image_url.ends_with(".png"));
    assert_eq!(
        client.session().load().unwrap().user.unwrap().profile_image.as_deref(),
        Some(image_url.as_str())
    );

    let served = reqwest::get(format!("{}{}", base_url, image_url)).await.unwrap();
    assert_eq!(served.status(), 200);
    assert_eq!(served.bytes().await.unwrap().to_vec(), bytes);

    let rejected = client
        .update_profile(
            &ProfileUpdate::default(),
            Some(ImageFile {
                file_name: "script.exe".to_string(),
                bytes: vec![0; 4],
            }),
        )
        .await;
    assert_eq!(
        rejected.error.as_deref(),
        Some("Invalid file type. Allowed: png, jpg, jpeg, gif")
    );

    let other =
        SmsGuardClient::new(&base_url, SessionStore::new(dir.path().join("zoe.json"))).unwrap();
    assert!(other.register("zoe", "zoe@example.com", "secret123", "secret123").await.success);
    let taken = ProfileUpdate {
        username: Some("zoe".to_string()),
        ..Default::default()
    };
    let rejected = client
        .update_profile(
            &taken,
            Some(ImageFile {
                file_name: "new.png".to_string(),
                bytes: b"new image".to_vec(),
            }),
        )
        .await;
    assert_eq!(rejected.error.as_deref(), Some("Username already taken"));

    let uploads = dir.path().join("uploads");
    let stored: Vec<_> = std::fs::read_dir(&uploads)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(stored, vec![image_url.rsplit('/').next().unwrap().to_string()]);
    assert_eq!(client.current_user().await.data.unwrap().profile_image, Some(image_url));
}

#[tokio::test]
async fn test_chat_and_account_deletion() {
    let (base_url, dir) = spawn_server().await;
    let client = client(&base_url, &dir, "erin");
    assert!(client.register("erin", "erin@example.com", "secret123", "secret123").await.success);

    let reply = client.chat("Click http://win.example.com to claim your prize", true).await;
    assert!(reply.success, "{:?}", reply.error);
    assert_eq!(reply.data.unwrap().conversation_length, 2);

    let conversation = client.conversation().await.data.unwrap();
    assert_eq!(conversation.conversation.len(), 2);
    assert_eq!(conversation.summary.total_messages, Some(2));

    assert!(client.quick_analyze("See you at 5").await.success);
    assert!(client.clear_conversation().await.success);
    assert!(client.conversation().await.data.unwrap().conversation.is_empty());

    let deleted = client.delete_account().await;
    assert!(deleted.success, "{:?}", deleted.error);
    assert!(!client.is_authenticated());

    let login = client.login("erin", "secret123").await;
    assert!(!login.success);
}

#[tokio::test]
async fn test_validation_happens_before_any_request() {
    let client = SmsGuardClient::new(
        dead_url().await,
        SessionStore::new(tempfile::tempdir().unwrap().path().join("s.json")),
    )
    .unwrap();

    let response = client.predict("   ").await;
    assert_eq!(response.error.as_deref(), Some("Message cannot be empty"));

    let response = client.predict(&"x".repeat(1001)).await;
    assert_eq!(
        response.error.as_deref(),
        Some("Message too long. Maximum 1000 characters allowed.")
    );

    let response = client.login("", "secret").await;
    assert_eq!(response.error.as_deref(), Some("Username or email is required"));

    let response = client.register("zed", "zed@example.com", "secret123", "secret124").await;
    assert_eq!(response.error.as_deref(), Some("Passwords do not match"));

    let response = client.reset_password("token", "weak", None).await;
    assert_eq!(
        response.error.as_deref(),
        Some("Password must be at least 8 characters long")
    );

    let response = client.change_password("old", "new", None).await;
    assert_eq!(
        response.error.as_deref(),
        Some("New password must be at least 6 characters long")
    );
}

#[tokio::test]
async fn test_network_failure_uses_fallback_text() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&dead_url().await, &dir, "offline");

    let response = client.login("someone", "secret123").await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Login failed. Please try again."));

    let response = client.predict("Is this spam?").await;
    assert_eq!(response.error.as_deref(), Some("Prediction failed. Please try again."));

    let response = client.health().await;
    assert_eq!(response.error.as_deref(), Some("Network error. Please try again."));
}

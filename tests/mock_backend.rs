use std::path::{Path, PathBuf};
use std::time::Duration;
use supplier_portal_lib::commands;
use supplier_portal_lib::error::ErrorKind;
use supplier_portal_lib::mock::{MockServer, ADMIN_USERNAME};
use supplier_portal_lib::models::{Granularity, MessageStatus, MessageType, ReactionType};
use supplier_portal_lib::services::chat_state::display_messages;
use supplier_portal_lib::services::config_service::Config;
use supplier_portal_lib::AppState;

async fn start_server() -> MockServer {
    MockServer::start("127.0.0.1:0".parse().unwrap(), Duration::from_millis(5))
        .await
        .unwrap()
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("supplier-portal-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn app_state(server: &MockServer, data_dir: &Path) -> AppState {
    let config = Config {
        api_base_url: server.api_base_url(),
        download_dir: Some(data_dir.join("downloads")),
        ..Config::default()
    };
    AppState::new(config, data_dir).unwrap()
}

#[tokio::test]
async fn sent_message_gets_a_streamed_reply() {
    let server = start_server().await;
    let dir = scratch_dir();
    let state = app_state(&server, &dir);

    let status = commands::auth::login(&state, "acme-supplier".into(), "correct horse".into())
        .await
        .unwrap();
    assert!(status.is_authenticated);
    assert!(!status.is_admin);

    let chat = commands::chat::create_chat(&state, Some("Invoices".into()))
        .await
        .unwrap();
    let history = commands::chat::open_chat(&state, chat.id.clone()).await.unwrap();
    assert!(history.is_empty());
    assert!(state.controller.store().snapshot().connection.is_live());

    let sent = commands::chat::send_chat_message(&state, "When is my invoice paid?".into(), Vec::new())
        .await
        .unwrap();
    let reply = commands::chat::wait_for_reply(&state, sent.user_message.id.clone(), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(reply.status, MessageStatus::Completed);
    assert_eq!(reply.message_type, MessageType::Ai);
    assert!(reply.content.contains("[[doc:supplier-handbook#page="));

    let snapshot = state.controller.store().snapshot();
    let shown = display_messages(&snapshot);
    assert_eq!(shown.len(), 2);
    assert!(shown.iter().all(|m| !m.is_optimistic()));
    assert!(snapshot.streaming.is_empty());

    let with_suggestions = state
        .controller
        .store()
        .wait_until(Duration::from_secs(5), |s| !s.suggestions.is_empty())
        .await
        .unwrap();
    assert_eq!(with_suggestions.suggestions.len(), 2);

    let reloaded = commands::chat::reload_chat(&state).await.unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded[1].content, reply.content);

    let reaction = commands::chat::react_to_message(&state, reply.id.clone(), ReactionType::Like)
        .await
        .unwrap();
    assert_eq!(reaction.message_id, reply.id);

    commands::chat::close_chat(&state).await;
    let stored = commands::chat::get_chat(&state, chat.id).await.unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.messages[1].content, reply.content);
    assert!(stored.messages[1].reaction(ReactionType::Like).is_some());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn saved_session_is_restored_and_cleared() {
    let server = start_server().await;
    let dir = scratch_dir();

    let first = app_state(&server, &dir);
    commands::auth::login(&first, "acme-supplier".into(), "correct horse".into())
        .await
        .unwrap();

    let second = app_state(&server, &dir);
    let status = commands::auth::restore_session(&second).await.unwrap();
    assert!(status.is_authenticated);
    assert_eq!(status.username.as_deref(), Some("acme-supplier"));
    assert_eq!(
        commands::auth::get_current_user(&second).await.unwrap().username,
        "acme-supplier"
    );

    commands::auth::signout(&second).await.unwrap();
    assert!(!commands::auth::check_auth_status(&second).unwrap().is_authenticated);
    assert!(commands::chat::list_chats(&second).await.is_err());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn session_unknown_to_the_backend_is_cleared_on_restore() {
    let dir = scratch_dir();
    {
        let first_server = start_server().await;
        let first = app_state(&first_server, &dir);
        commands::auth::login(&first, "acme-supplier".into(), "correct horse".into())
            .await
            .unwrap();
    }

    let server = start_server().await;
    let state = app_state(&server, &dir);
    assert!(state.auth_path().exists());

    let status = commands::auth::restore_session(&state).await.unwrap();
    assert!(!status.is_authenticated);
    assert!(!state.auth_path().exists());
    assert_eq!(state.http.token(), None);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn requests_without_a_session_are_unauthorized() {
    let server = start_server().await;
    let dir = scratch_dir();
    let state = app_state(&server, &dir);

    let err = state.chats.list_chats().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn uploaded_files_download_under_their_name() {
    let server = start_server().await;
    let dir = scratch_dir();
    let state = app_state(&server, &dir);
    commands::auth::login(&state, "acme-supplier".into(), "correct horse".into())
        .await
        .unwrap();

    let bytes = b"%PDF-1.4 supplier terms".to_vec();
    let file = state.files.upload_bytes("terms.pdf", bytes.clone()).await.unwrap();
    assert_eq!(file.name, "terms.pdf");
    assert_eq!(file.size, Some(bytes.len() as u64));

    let info = commands::files::get_file_info(&state, file.id.clone()).await.unwrap();
    assert_eq!(info, file);

    let path = commands::files::download_file(&state, file.id.clone()).await.unwrap();
    assert_eq!(path, dir.join("downloads").join("terms.pdf"));
    assert_eq!(std::fs::read(&path).unwrap(), bytes);

    commands::files::delete_file(&state, file.id.clone()).await.unwrap();
    assert!(commands::files::get_file_info(&state, file.id).await.is_err());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn admin_dashboard_data_is_admin_only() {
    let server = start_server().await;
    let dir = scratch_dir();
    let state = app_state(&server, &dir);

    commands::auth::login(&state, "acme-supplier".into(), "correct horse".into())
        .await
        .unwrap();
    assert!(commands::admin::cluster_overview(&state, 30, None).await.is_err());

    let status = commands::auth::login(&state, ADMIN_USERNAME.into(), "admin-password".into())
        .await
        .unwrap();
    assert!(status.is_admin);

    assert!(commands::admin::cluster_overview(&state, i64::MAX / 1000, None).await.is_err());
    assert!(commands::admin::feedback_timeline(&state, Granularity::Day, -1).await.is_err());

    let overview = commands::admin::cluster_overview(&state, 30, Some(3)).await.unwrap();
    assert_eq!(overview.clusters.len(), 5);
    assert_eq!(overview.shares.len(), 4);
    assert_eq!(overview.shares.last().unwrap().name, "Other");
    let percent: f64 = overview.shares.iter().map(|s| s.percent).sum();
    assert!((percent - 100.0).abs() < 0.01);

    let timeline = commands::admin::feedback_timeline(&state, Granularity::Day, 7)
        .await
        .unwrap();
    assert!(timeline.series.len() >= 7);
    for pair in timeline.series.windows(2) {
        assert_eq!(pair[1].bucket_start - pair[0].bucket_start, chrono::Duration::days(1));
    }

    let page = commands::admin::list_admin_chats(&state, Default::default())
        .await
        .unwrap();
    assert_eq!(page.page, 1);

    let _ = std::fs::remove_dir_all(dir);
}

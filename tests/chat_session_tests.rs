use std::sync::Arc;

use serde_json::json;
use streamchat::api::{ApiError, ChatApi};
use streamchat::core::pagination::ScrollMetrics;
use streamchat::core::state::{OpsPatch, TurnPhase};
use streamchat::core::{ChatSession, NoopHooks, SessionOps};
use streamchat::transport::TokenStore;
use tokio_test::assert_ok;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path, query_param},
};

// ============================================================================
// Helper Functions
// ============================================================================

fn session(server: &MockServer, tokens: Arc<TokenStore>) -> ChatSession {
    let backend = ChatApi::new(&server.uri(), tokens);
    ChatSession::new(
        Arc::new(backend),
        Arc::new(NoopHooks),
        SessionOps::with_model("test-model"),
    )
}

fn near_top(height: f64) -> ScrollMetrics {
    ScrollMetrics {
        scroll_top: 10.0,
        scroll_height: height,
    }
}

async fn mount_stream(server: &MockServer, chat_id: &str) {
    let body = format!(
        "{{\"type\":\"delta\",\"data\":\"Hi \"}}\n\
         {{\"type\":\"delta\",\"data\":\"there\"}}\n\
         {{\"type\":\"done\",\"data\":{{\"chatId\":\"{chat_id}\",\"title\":\"Greeting\",\"inputTokens\":4,\"outputTokens\":2}}}}\n"
    );
    Mock::given(method("POST"))
        .and(path("/chat/send-message"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn page(ids: &[&str], has_more: bool) -> serde_json::Value {
    let messages: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            json!({
                "id": id,
                "role": if i % 2 == 0 { "user" } else { "assistant" },
                "content": format!("message {id}"),
            })
        })
        .collect();
    json!({
        "messages": messages,
        "maxTokens": 2048,
        "temperature": 0.7,
        "hasMore": has_more,
    })
}

fn ids(session: &ChatSession) -> Vec<String> {
    session
        .state()
        .messages()
        .iter()
        .filter_map(|m| m.id.clone())
        .collect()
}

// ============================================================================
// Turns
// ============================================================================

#[tokio::test]
async fn test_first_turn_adopts_conversation_and_second_reuses_it() {
    let server = MockServer::start().await;
    mount_stream(&server, "c1").await;
    let mut session = session(&server, Arc::new(TokenStore::new(Some("t".to_string()))));

    assert!(session.handle_user_message("hello", None));
    session.run_until_idle().await;
    assert_eq!(session.state().conversation_id(), Some("c1"));
    assert_eq!(session.state().messages()[1].content, "Hi there");
    assert_eq!(session.state().messages()[1].output_tokens, Some(2));

    assert!(session.handle_user_message("again", None));
    session.run_until_idle().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first = String::from_utf8_lossy(&requests[0].body).into_owned();
    let second = String::from_utf8_lossy(&requests[1].body).into_owned();
    assert!(!first.contains("name=\"chatId\""));
    assert!(second.contains("name=\"chatId\""));
    assert!(second.contains("c1"));
    assert_eq!(session.state().messages().len(), 4);
    assert!(!session.state().is_sending());
}

#[tokio::test]
async fn test_unauthorized_turn_fails_and_logs_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/send-message"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let tokens = Arc::new(TokenStore::new(Some("expired".to_string())));
    let mut session = session(&server, tokens.clone());

    session.handle_user_message("hello", None);
    session.run_until_idle().await;

    assert!(tokens.is_logged_out());
    assert!(!session.state().is_sending());
    assert_eq!(session.state().phase(), TurnPhase::Idle);
    assert_eq!(session.state().failed_turn(), Some("unauthorized"));
    assert!(session.state().messages()[0].is_failed());
}

#[tokio::test]
async fn test_stream_error_event_marks_turn_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/send-message"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"type\":\"delta\",\"data\":\"par\"}\n{\"type\":\"error\",\"data\":{\"message\":\"model overloaded\"}}\n",
        ))
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    session.handle_user_message("hello", None);
    session.run_until_idle().await;

    assert_eq!(session.state().failed_turn(), Some("model overloaded"));
    assert!(session.state().messages()[1].is_failed());
    assert_eq!(session.state().messages()[1].content, "par");
}

// ============================================================================
// History and Pagination
// ============================================================================

#[tokio::test]
async fn test_older_pages_are_prepended_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .and(query_param("beforeMessageId", "m3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["m1", "m2"], false)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["m3", "m4"], true)))
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    assert_ok!(session.enter_conversation("c1").await);
    assert_eq!(ids(&session), vec!["m3", "m4"]);
    assert!(session.state().has_more());

    assert!(session.maybe_load_older(near_top(800.0)));
    session.run_until_idle().await;

    assert_eq!(ids(&session), vec!["m1", "m2", "m3", "m4"]);
    assert!(!session.state().has_more());
    assert!(!session.state().is_loading_older());

    // No more pages: scrolling to the top again does nothing.
    assert!(!session.maybe_load_older(near_top(1600.0)));
    server.verify().await;
}

#[tokio::test]
async fn test_no_older_request_when_server_has_no_more() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .and(query_param("beforeMessageId", "m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], false)))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["m1", "m2"], false)))
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    assert_ok!(session.enter_conversation("c1").await);
    assert!(!session.maybe_load_older(near_top(500.0)));
    assert!(!session.load_older(near_top(500.0)));

    server.verify().await;
}

#[tokio::test]
async fn test_failed_older_page_keeps_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .and(query_param("beforeMessageId", "m3"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["m3", "m4"], true)))
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    assert_ok!(session.enter_conversation("c1").await);
    assert!(session.maybe_load_older(near_top(800.0)));
    session.run_until_idle().await;

    assert_eq!(ids(&session), vec!["m3", "m4"]);
    assert!(!session.state().is_loading_older());
    assert!(session.state().has_more());

    // The failed fetch can be retried.
    assert!(session.maybe_load_older(near_top(800.0)));
}

// ============================================================================
// Conversation Settings
// ============================================================================

#[tokio::test]
async fn test_changed_settings_are_saved_on_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["m1", "m2"], false)))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/chat/c1/update-max-tokens"))
        .and(body_json(json!({ "maxTokens": 512 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/chat/c1/update-temperature"))
        .and(body_json(json!({ "temperature": 0.5 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/chat/c1/update-ai-features"))
        .and(body_json(json!({ "isWebSearch": true, "isImageGeneration": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    assert_ok!(session.enter_conversation("c1").await);
    assert_ok!(
        session
            .set_ops(OpsPatch {
                max_tokens: Some(512),
                temperature: Some(0.5),
                is_web_search: Some(true),
                ..OpsPatch::default()
            })
            .await
    );

    assert_eq!(session.state().ops().max_tokens, 512);
    server.verify().await;
}

#[tokio::test]
async fn test_settings_of_a_new_conversation_stay_local() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    assert_ok!(
        session
            .set_ops(OpsPatch {
                temperature: Some(0.1),
                ..OpsPatch::default()
            })
            .await
    );

    assert_eq!(session.state().ops().temperature, 0.1);
    server.verify().await;
}

#[tokio::test]
async fn test_failed_settings_save_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["m1"], false)))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/chat/c1/update-max-tokens"))
        .respond_with(ResponseTemplate::new(500).set_body_string("nope"))
        .mount(&server)
        .await;
    let mut session = session(&server, Arc::new(TokenStore::new(None)));

    assert_ok!(session.enter_conversation("c1").await);
    let result = session
        .set_ops(OpsPatch {
            max_tokens: Some(64),
            ..OpsPatch::default()
        })
        .await;

    assert_eq!(
        result,
        Err(ApiError::Status {
            status: 500,
            body: "nope".to_string()
        })
    );
}


//! Provider and LINE clients against local mock HTTP servers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde_json::{Value, json};

use relaybot::relay::{
    ArtifactCache, Completion, GeminiClient, GrokClient, ImageRef, ImageStrategy, LineClient, Mode, OutboundMessage,
    Providers, Replier, Turn, Upstream, UpstreamError,
};

const TIMEOUT: Duration = Duration::from_secs(5);

type Captured = Arc<Mutex<Vec<(String, Value)>>>;

/// Serve `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Mock Grok that answers chat with a fixed reply and images with a fixed URL.
async fn mock_grok(chat_reply: Value, image_reply: Value) -> (String, Captured) {
    let captured: Captured = Arc::default();

    let chat = {
        let captured = captured.clone();
        move |headers: HeaderMap, Json(body): Json<Value>| async move {
            captured.lock().unwrap().push((bearer(&headers), body));
            Json(chat_reply)
        }
    };
    let images = {
        let captured = captured.clone();
        move |headers: HeaderMap, Json(body): Json<Value>| async move {
            captured.lock().unwrap().push((bearer(&headers), body));
            Json(image_reply)
        }
    };

    let app = Router::new()
        .route("/chat/completions", post(chat))
        .route("/images/generations", post(images));
    (serve(app).await, captured)
}

fn grok_chat_reply(content: &str) -> Value {
    json!({
        "id": "c1",
        "choices": [{"index": 0, "finish_reason": "stop", "message": {"role": "assistant", "content": content}}]
    })
}

/// Mock Gemini `generateContent` returning a fixed body; records model path and key.
async fn mock_gemini(status: StatusCode, reply: Value) -> (String, Captured) {
    let captured: Captured = Arc::default();
    let state = (captured.clone(), status, reply);

    async fn generate(
        State((captured, status, reply)): State<(Captured, StatusCode, Value)>,
        Path(model_action): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let key = query.get("key").cloned().unwrap_or_default();
        captured
            .lock()
            .unwrap()
            .push((format!("{model_action}?key={key}"), body));
        (status, Json(reply))
    }

    let app = Router::new()
        .route("/models/{model_action}", post(generate))
        .with_state(state);
    (serve(app).await, captured)
}

fn providers(grok_base: &str, gemini_base: &str, artifacts: ArtifactCache) -> Providers {
    Providers::new(
        GrokClient::new("xai-key".into(), grok_base.into(), TIMEOUT),
        GeminiClient::new("gem-key".into(), gemini_base.into(), TIMEOUT),
        artifacts,
    )
}

// =============================================================================
// GROK
// =============================================================================

#[tokio::test]
async fn test_grok_chat_sends_history_then_message() {
    let (base, captured) = mock_grok(grok_chat_reply("4"), json!({})).await;
    let client = GrokClient::new("xai-key".into(), base, TIMEOUT);

    let turns = vec![Turn::user("hi"), Turn::assistant("hello"), Turn::user("what is 2+2")];
    let answer = client.chat(&turns).await.unwrap();
    assert_eq!(answer, "4");

    let captured = captured.lock().unwrap().clone();
    assert_eq!(captured[0].0, "Bearer xai-key");
    assert_eq!(captured[0].1["model"], "grok-3-beta");
    assert_eq!(
        captured[0].1["messages"],
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"},
            {"role": "user", "content": "what is 2+2"}
        ])
    );
}

#[tokio::test]
async fn test_raw_completion_passes_through() {
    let reply = json!({
        "id": "chatcmpl-9",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "grok-3-beta",
        "choices": [{"index": 0, "finish_reason": "stop", "message": {"role": "assistant", "content": "303"}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
    });
    let (base, captured) = mock_grok(reply.clone(), json!({})).await;
    let providers = providers(&base, "http://127.0.0.1:9", ArtifactCache::new(TIMEOUT));

    let turns = vec![Turn::user("What is 101*3?"), Turn::assistant("Let me think.")];
    let completion = providers.chat_completion(&turns).await.unwrap();
    assert_eq!(serde_json::to_value(&completion).unwrap(), reply);

    let sent = captured.lock().unwrap()[0].1["messages"].clone();
    assert_eq!(
        sent,
        json!([
            {"role": "user", "content": "What is 101*3?"},
            {"role": "assistant", "content": "Let me think."}
        ])
    );
}

#[tokio::test]
async fn test_grok_no_choices_is_error() {
    let (base, _) = mock_grok(json!({"choices": []}), json!({})).await;
    let client = GrokClient::new("k".into(), base, TIMEOUT);

    let err = client.chat(&[Turn::user("hi")]).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Empty(_)));
}

#[tokio::test]
async fn test_grok_unexpected_schema_is_parse_error() {
    let (base, _) = mock_grok(json!({"choices": "nope"}), json!({})).await;
    let client = GrokClient::new("k".into(), base, TIMEOUT);

    let err = client.chat(&[Turn::user("hi")]).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Parse(_)));
}

#[tokio::test]
async fn test_grok_error_status() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
    );
    let base = serve(app).await;
    let client = GrokClient::new("k".into(), base, TIMEOUT);

    match client.chat(&[Turn::user("hi")]).await {
        Err(UpstreamError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad key");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_grok_timeout() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(grok_chat_reply("late"))
        }),
    );
    let base = serve(app).await;
    let client = GrokClient::new("k".into(), base, Duration::from_millis(200));

    let err = client.chat(&[Turn::user("hi")]).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout));
}

#[tokio::test]
async fn test_hosted_image_two_stage() {
    let (base, captured) = mock_grok(
        grok_chat_reply("  a fluffy orange cat, watercolor  "),
        json!({"data": [{"url": "https://imgs.x.ai/cat.jpg"}]}),
    )
    .await;
    let providers = providers(&base, "http://127.0.0.1:9", ArtifactCache::new(TIMEOUT));

    let completion = providers
        .complete(&[Turn::user("ignored")], "draw a cat", Mode::Image(ImageStrategy::Hosted))
        .await
        .unwrap();
    assert_eq!(
        completion,
        Completion::Image(ImageRef::Hosted("https://imgs.x.ai/cat.jpg".into()))
    );

    let captured = captured.lock().unwrap().clone();
    assert_eq!(captured.len(), 2);
    let derive = &captured[0].1["messages"];
    assert_eq!(derive.as_array().unwrap().len(), 1);
    assert!(derive[0]["content"].as_str().unwrap().contains("draw a cat"));
    assert_eq!(
        captured[1].1,
        json!({
            "prompt": "a fluffy orange cat, watercolor",
            "n": 1,
            "model": "grok-2-image-1212",
            "response_format": "url"
        })
    );
}

#[tokio::test]
async fn test_hosted_image_without_url_is_error() {
    let (base, _) = mock_grok(grok_chat_reply("a cat"), json!({"data": []})).await;
    let providers = providers(&base, "http://127.0.0.1:9", ArtifactCache::new(TIMEOUT));

    let err = providers
        .complete(&[], "draw a cat", Mode::Image(ImageStrategy::Hosted))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Empty(_)));
}

#[tokio::test]
async fn test_text_mode_appends_message_to_history() {
    let (base, captured) = mock_grok(grok_chat_reply("sure"), json!({})).await;
    let providers = providers(&base, "http://127.0.0.1:9", ArtifactCache::new(TIMEOUT));

    let completion = providers
        .complete(&[Turn::user("a"), Turn::assistant("b")], "c", Mode::Text)
        .await
        .unwrap();
    assert_eq!(completion, Completion::Text("sure".into()));

    let messages = captured.lock().unwrap()[0].1["messages"].clone();
    assert_eq!(messages.as_array().unwrap().len(), 3);
    assert_eq!(messages[2], json!({"role": "user", "content": "c"}));
}

// =============================================================================
// GEMINI
// =============================================================================

#[tokio::test]
async fn test_inline_image_stored_as_artifact() {
    let png = vec![0x89, b'P', b'N', b'G', 13, 10, 26, 10];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
    let (base, captured) = mock_gemini(
        StatusCode::OK,
        json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": encoded}}
                ]}
            }]
        }),
    )
    .await;
    let artifacts = ArtifactCache::new(TIMEOUT);
    let providers = providers("http://127.0.0.1:9", &base, artifacts.clone());

    let completion = providers
        .complete(&[], "a cat", Mode::Image(ImageStrategy::Inline))
        .await
        .unwrap();

    let Completion::Image(ImageRef::Artifact(key)) = completion else {
        panic!("expected artifact, got {completion:?}");
    };
    let artifact = artifacts.get(&key).unwrap();
    assert_eq!(*artifact.data, png);
    assert_eq!(artifact.content_type, "image/png");

    let captured = captured.lock().unwrap().clone();
    assert_eq!(captured[0].0, "gemini-2.5-flash-image:generateContent?key=gem-key");
    assert_eq!(captured[0].1["contents"][0]["parts"][0]["text"], "a cat");
}

#[tokio::test]
async fn test_inline_image_missing_is_error() {
    let (base, _) = mock_gemini(
        StatusCode::OK,
        json!({"candidates": [{"content": {"parts": [{"text": "I can't draw that"}]}}]}),
    )
    .await;
    let artifacts = ArtifactCache::new(TIMEOUT);
    let providers = providers("http://127.0.0.1:9", &base, artifacts.clone());

    let err = providers
        .complete(&[], "a cat", Mode::Image(ImageStrategy::Inline))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Empty(_)));
    assert!(artifacts.is_empty());
}

#[tokio::test]
async fn test_inline_image_bad_mime_stored_as_png() {
    let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
    let (base, _) = mock_gemini(
        StatusCode::OK,
        json!({
            "candidates": [{
                "content": {"parts": [{"inlineData": {"mimeType": "application/octet-stream", "data": encoded}}]}
            }]
        }),
    )
    .await;
    let artifacts = ArtifactCache::new(TIMEOUT);
    let providers = providers("http://127.0.0.1:9", &base, artifacts.clone());

    let completion = providers
        .complete(&[], "a cat", Mode::Image(ImageStrategy::Inline))
        .await
        .unwrap();
    let Completion::Image(ImageRef::Artifact(key)) = completion else {
        panic!("expected artifact, got {completion:?}");
    };
    assert!(key.ends_with(".png"));
    assert_eq!(artifacts.get(&key).unwrap().content_type, "image/png");
}

#[tokio::test]
async fn test_gemini_error_object() {
    let (base, _) = mock_gemini(StatusCode::OK, json!({"error": {"message": "quota exceeded"}})).await;
    let client = GeminiClient::new("k".into(), base, TIMEOUT);

    match client.generate_image("a cat").await {
        Err(UpstreamError::Provider(msg)) => assert_eq!(msg, "quota exceeded"),
        Err(e) => panic!("expected provider error, got {e}"),
        Ok(_) => panic!("expected provider error, got image"),
    }
}

#[tokio::test]
async fn test_gemini_error_status() {
    let (base, _) = mock_gemini(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": {"message": "boom"}})).await;
    let client = GeminiClient::new("k".into(), base, TIMEOUT);

    let err = client.search("q", "here").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_search_appends_citations() {
    let (base, captured) = mock_gemini(
        StatusCode::OK,
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Sunny, 28C."}]},
                "groundingMetadata": {
                    "webSearchQueries": ["weather taipei"],
                    "groundingChunks": [
                        {"web": {"uri": "https://weather.example/tpe", "title": "weather.example"}},
                        {"web": {"uri": "https://news.example/today", "title": "news.example"}}
                    ]
                }
            }]
        }),
    )
    .await;
    let providers = providers("http://127.0.0.1:9", &base, ArtifactCache::new(TIMEOUT));

    let answer = providers.search("weather today", "Taiwan Taipei").await.unwrap();
    assert_eq!(
        answer,
        "Sunny, 28C.\n[Sources]\n\
         Source[0][weather.example]: https://weather.example/tpe\n\
         Source[1][news.example]: https://news.example/today\n"
    );

    let captured = captured.lock().unwrap().clone();
    assert_eq!(captured[0].0, "gemini-2.0-flash:generateContent?key=gem-key");
    assert_eq!(
        captured[0].1,
        json!({
            "contents": [{"parts": [{"text": "weather today\nLocation: Taiwan Taipei"}]}],
            "tools": [{"google_search": {}}]
        })
    );
}

#[tokio::test]
async fn test_search_without_grounding_returns_text() {
    let (base, _) = mock_gemini(
        StatusCode::OK,
        json!({"candidates": [{"content": {"parts": [{"text": "42"}]}}]}),
    )
    .await;
    let client = GeminiClient::new("k".into(), base, TIMEOUT);

    assert_eq!(client.search("answer?", "nowhere").await.unwrap(), "42");
}

#[tokio::test]
async fn test_search_no_candidates() {
    let (base, _) = mock_gemini(StatusCode::OK, json!({"candidates": []})).await;
    let client = GeminiClient::new("k".into(), base, TIMEOUT);

    let err = client.search("q", "here").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Empty(_)));
}

// =============================================================================
// LINE
// =============================================================================

async fn mock_line() -> (String, Captured) {
    let captured: Captured = Arc::default();

    let record = |path: &'static str, captured: Captured| {
        move |headers: HeaderMap, Json(body): Json<Value>| async move {
            captured
                .lock()
                .unwrap()
                .push((format!("{path} {}", bearer(&headers)), body));
            Json(json!({}))
        }
    };

    let app = Router::new()
        .route("/message/reply", post(record("reply", captured.clone())))
        .route("/message/push", post(record("push", captured.clone())))
        .route(
            "/channel/webhook/endpoint",
            get(|| async { Json(json!({"endpoint": "https://bot.example.com/callback", "active": true})) }),
        );
    (serve(app).await, captured)
}

#[tokio::test]
async fn test_line_reply_overflow_is_pushed() {
    let (base, captured) = mock_line().await;
    let client = LineClient::new("channel-token".into(), base, TIMEOUT);

    let messages: Vec<OutboundMessage> = (0..7).map(|i| OutboundMessage::Text(format!("part {i}"))).collect();
    client.reply("reply-token", "U1", &messages).await.unwrap();

    let captured = captured.lock().unwrap().clone();
    assert_eq!(captured.len(), 2);

    assert_eq!(captured[0].0, "reply Bearer channel-token");
    assert_eq!(captured[0].1["replyToken"], "reply-token");
    assert_eq!(captured[0].1["messages"].as_array().unwrap().len(), 5);
    assert_eq!(captured[0].1["messages"][0], json!({"type": "text", "text": "part 0"}));

    assert_eq!(captured[1].0, "push Bearer channel-token");
    assert_eq!(captured[1].1["to"], "U1");
    assert_eq!(
        captured[1].1["messages"],
        json!([{"type": "text", "text": "part 5"}, {"type": "text", "text": "part 6"}])
    );
}

#[tokio::test]
async fn test_line_reply_image() {
    let (base, captured) = mock_line().await;
    let client = LineClient::new("t".into(), base, TIMEOUT);

    let messages = vec![OutboundMessage::Image { url: "https://bot.example.com/img/k.png".into() }];
    client.reply("tok", "U1", &messages).await.unwrap();

    let captured = captured.lock().unwrap().clone();
    assert_eq!(
        captured[0].1["messages"][0],
        json!({
            "type": "image",
            "originalContentUrl": "https://bot.example.com/img/k.png",
            "previewImageUrl": "https://bot.example.com/img/k.png"
        })
    );
}

#[tokio::test]
async fn test_line_reply_failure_reported() {
    let app = Router::new().route(
        "/message/reply",
        post(|| async { (StatusCode::BAD_REQUEST, "Invalid reply token") }),
    );
    let base = serve(app).await;
    let client = LineClient::new("t".into(), base, TIMEOUT);

    let err = client
        .reply("expired", "U1", &[OutboundMessage::Text("hi".into())])
        .await
        .unwrap_err();
    assert!(err.contains("Invalid reply token"));
}

#[tokio::test]
async fn test_line_webhook_endpoint() {
    let (base, _) = mock_line().await;
    let client = LineClient::new("t".into(), base, TIMEOUT);

    let endpoint = client.webhook_endpoint().await.unwrap();
    assert_eq!(endpoint, "https://bot.example.com/callback");
    assert_eq!(
        relaybot::relay::line::public_base(&endpoint).as_deref(),
        Some("https://bot.example.com")
    );
}

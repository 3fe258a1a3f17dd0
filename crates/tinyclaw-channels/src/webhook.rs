//! Webhook receiver — HTTP endpoints for push-style channels.
//!
//! axum server exposing `POST /webhook/{feishu,dingtalk,qq}` plus
//! `GET /health`. Each POST body is handed verbatim to the named channel's
//! `handle_incoming_message`; a channel that is absent or disabled yields
//! 503. Feishu's URL-verification challenge is echoed back as JSON before
//! any channel involvement. Method mismatches get axum's standard 405.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::base::Channel;

#[derive(Clone)]
struct ReceiverState {
    channels: Arc<HashMap<String, Arc<dyn Channel>>>,
}

/// HTTP front door for push channels.
pub struct WebhookReceiver {
    host: String,
    port: u16,
    state: ReceiverState,
    shutdown: Arc<Notify>,
}

impl WebhookReceiver {
    /// `channels` maps webhook path segment → channel (e.g. `"feishu"`).
    pub fn new(host: String, port: u16, channels: HashMap<String, Arc<dyn Channel>>) -> Self {
        Self {
            host,
            port,
            state: ReceiverState {
                channels: Arc::new(channels),
            },
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhook/feishu", post(handle_feishu))
            .route("/webhook/dingtalk", post(handle_dingtalk))
            .route("/webhook/qq", post(handle_qq))
            .route("/health", get(handle_health))
            .with_state(self.state.clone())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "webhook receiver listening");
        Ok(listener)
    }

    /// Serve until `stop()` is called.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await?;
        info!("webhook receiver stopped");
        Ok(())
    }

    /// Bind + serve in one call.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_feishu(State(state): State<ReceiverState>, body: String) -> Response {
    // URL-verification handshake: echo the challenge verbatim.
    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        if let Some(challenge) = value.get("challenge") {
            debug!("answering feishu url verification");
            return Json(json!({"challenge": challenge})).into_response();
        }
    }
    dispatch(&state, "feishu", &body, json!({"code": 0})).await
}

async fn handle_dingtalk(State(state): State<ReceiverState>, body: String) -> Response {
    dispatch(&state, "dingtalk", &body, json!({"errcode": 0})).await
}

async fn handle_qq(State(state): State<ReceiverState>, body: String) -> Response {
    dispatch(&state, "qq", &body, json!({"status": "ok"})).await
}

/// Hand the body to the named channel; 503 when it is not wired up.
async fn dispatch(state: &ReceiverState, name: &str, body: &str, ok_body: Value) -> Response {
    let Some(channel) = state.channels.get(name) else {
        warn!(channel = name, "webhook for unavailable channel");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": format!("channel '{name}' unavailable")})),
        )
            .into_response();
    };

    match channel.handle_incoming_message(body).await {
        Ok(()) => Json(ok_body).into_response(),
        Err(e) => {
            warn!(channel = name, error = %e, "webhook body rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tinyclaw_core::bus::OutboundMessage;

    struct RecordingChannel {
        channel_name: String,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingChannel {
        fn new(name: &str) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let channel = Arc::new(Self {
                channel_name: name.into(),
                received: received.clone(),
            });
            (channel, received)
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            &self.channel_name
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_running(&self) -> bool {
            true
        }
        fn is_allowed(&self, _sender_id: &str) -> bool {
            true
        }
        async fn send(&self, _msg: &OutboundMessage) -> anyhow::Result<()> {
            Ok(())
        }
        async fn handle_incoming_message(&self, raw: &str) -> anyhow::Result<()> {
            self.received.lock().unwrap().push(raw.to_string());
            Ok(())
        }
    }

    async fn spawn_receiver(
        channels: HashMap<String, Arc<dyn Channel>>,
    ) -> (Arc<WebhookReceiver>, String) {
        let receiver = Arc::new(WebhookReceiver::new("127.0.0.1".into(), 0, channels));
        let listener = receiver.bind().await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.serve(listener).await });
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        (receiver, base)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (receiver, base) = spawn_receiver(HashMap::new()).await;

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        receiver.stop();
    }

    #[tokio::test]
    async fn feishu_challenge_echoed() {
        let (receiver, base) = spawn_receiver(HashMap::new()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/webhook/feishu"))
            .body(r#"{"challenge": "tok-123", "type": "url_verification"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["challenge"], "tok-123");

        receiver.stop();
    }

    #[tokio::test]
    async fn body_forwarded_to_channel() {
        let (channel, received) = RecordingChannel::new("dingtalk");
        let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();
        channels.insert("dingtalk".into(), channel);
        let (receiver, base) = spawn_receiver(channels).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/webhook/dingtalk"))
            .body(r#"{"text": {"content": "hi"}}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["errcode"], 0);

        assert_eq!(received.lock().unwrap().len(), 1);
        assert!(received.lock().unwrap()[0].contains("hi"));

        receiver.stop();
    }

    #[tokio::test]
    async fn missing_channel_is_503() {
        let (receiver, base) = spawn_receiver(HashMap::new()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/webhook/qq"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);

        receiver.stop();
    }

    #[tokio::test]
    async fn method_mismatch_is_405() {
        let (receiver, base) = spawn_receiver(HashMap::new()).await;

        let resp = reqwest::get(format!("{base}/webhook/feishu")).await.unwrap();
        assert_eq!(resp.status(), 405);

        receiver.stop();
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (receiver, base) = spawn_receiver(HashMap::new()).await;
        let resp = reqwest::get(format!("{base}/webhook/nope")).await.unwrap();
        assert_eq!(resp.status(), 404);
        receiver.stop();
    }
}

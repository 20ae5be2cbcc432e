use crate::agent::ChatAgent;
use crate::config::Config;
use crate::providers::CompletionProvider;
use crate::storage::{EventLog, MessageStore};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

pub mod message;
pub mod reconcile;
pub mod signature;

pub use reconcile::{ReconcilePolicy, Reconciler};

/// Acknowledgment body for deliveries that get no formatted reply.
const SUCCESS_BODY: &str = "success";

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    messages: Arc<dyn MessageStore>,
    events: Arc<dyn EventLog>,
    provider: Arc<dyn CompletionProvider>,
    policy: ReconcilePolicy,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        messages: Arc<dyn MessageStore>,
        events: Arc<dyn EventLog>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config,
            messages,
            events,
            provider,
            policy: ReconcilePolicy::default(),
        }
    }

    #[cfg(test)]
    fn with_reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn agent(&self) -> ChatAgent {
        ChatAgent::new(
            self.messages.clone(),
            self.provider.clone(),
            i64::from(self.config.max_token),
        )
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.events.clone(), self.messages.clone(), self.policy)
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    #[serde(default)]
    pub echostr: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/wechat", get(handle_verify).post(handle_callback))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "webhook gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}

/// URL-ownership challenge. Echoes the token back only when the signature
/// over the shared secret checks out.
async fn handle_verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, String) {
    if !signature::verify(
        &state.config.token,
        &query.timestamp,
        &query.nonce,
        &query.signature,
    ) {
        tracing::warn!(timestamp = %query.timestamp, nonce = %query.nonce, "challenge signature mismatch");
        return (StatusCode::FORBIDDEN, "Forbidden".to_string());
    }
    (StatusCode::OK, query.echostr)
}

async fn handle_callback(State(state): State<AppState>, body: String) -> (StatusCode, String) {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("callback", %request_id);
    async move {
        match process_callback(&state, &body).await {
            Ok(reply) => (StatusCode::OK, reply),
            Err(err) => {
                tracing::error!("callback processing failed: {err:#}");
                (StatusCode::OK, SUCCESS_BODY.to_string())
            }
        }
    }
    .instrument(span)
    .await
}

async fn process_callback(state: &AppState, body: &str) -> Result<String> {
    let inbound = match message::decode(body) {
        Ok(inbound) => inbound,
        Err(err) => {
            // A payload that does not parse will never parse on redelivery;
            // ack so the transport stops retrying it.
            tracing::error!("failed to decode callback payload: {err:#}");
            return Ok(SUCCESS_BODY.to_string());
        }
    };
    tracing::info!(
        msg_type = %inbound.msg_type,
        from = %inbound.from_user_name,
        msg_id = inbound.msg_id.as_deref().unwrap_or(""),
        "callback received"
    );

    if let Some(msg_id) = inbound.msg_id.as_deref().filter(|id| !id.is_empty()) {
        let reconciler = state.reconciler();
        if reconciler.is_duplicate(msg_id, body).await? {
            tracing::debug!(msg_id, "duplicate delivery detected");
            if let Some(record) = reconciler.await_existing_answer(msg_id).await? {
                return Ok(message::render_text_reply(&inbound, &record.answer, Utc::now()));
            }
            // The original request never converged; process by type as usual.
        }
    }

    if inbound.msg_type == "text" {
        let session_id = inbound.from_user_name.clone();
        let content = inbound.content.clone().unwrap_or_default();
        let msgid = inbound.msg_id.clone().unwrap_or_default();
        let reply = state.agent().reply(&session_id, &msgid, &content).await?;
        return Ok(message::render_text_reply(&inbound, &reply, Utc::now()));
    }

    if let Some(notice) = unsupported_reply(&inbound.msg_type) {
        return Ok(message::render_text_reply(&inbound, notice, Utc::now()));
    }

    Ok(SUCCESS_BODY.to_string())
}

fn unsupported_reply(msg_type: &str) -> Option<&'static str> {
    match msg_type {
        "image" => Some("暂不支持图片消息"),
        "voice" => Some("暂不支持语音消息"),
        "video" => Some("暂不支持视频消息"),
        "music" => Some("暂不支持音乐消息"),
        "news" => Some("暂不支持图文消息"),
        _ => None,
    }
}

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use labbot_core::{
    domain::{ChatId, Reply},
    errors::Error,
    pipeline::GraphInput,
    security::{ApiKeyGuard, AuthFailure},
    service::ConversationService,
    utils::truncate_text,
};
use labbot_telegram::{message_from_update, TelegramHandler};

const API_KEY_HEADER: &str = "x-api-key";
const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
const WEBHOOK_PATH: &str = "/telegram/webhook";

#[derive(Clone)]
pub struct AppState {
    pub service: ConversationService,
    pub telegram: Option<Arc<TelegramHandler>>,
    pub guard: ApiKeyGuard,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.message }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, msg),
            Error::Security(msg) => Self::forbidden(msg),
            other => {
                error!(error = %other, "internal error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/bot/chat", post(chat))
        .route("/bot/reset", post(reset))
        .route(WEBHOOK_PATH, post(telegram_webhook))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// `X-Api-Key` everywhere; the webhook also accepts Telegram's secret token header.
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    let verdict = {
        let headers = req.headers();
        let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        let telegram_secret = (req.uri().path() == WEBHOOK_PATH)
            .then(|| headers.get(TELEGRAM_SECRET_HEADER))
            .flatten()
            .and_then(|v| v.to_str().ok());
        state.guard.check(&[api_key, telegram_secret])
    };

    match verdict {
        Ok(()) => Ok(next.run(req).await),
        Err(AuthFailure::Missing) => {
            warn!(path = %req.uri().path(), "request without api key");
            Err(AppError::bad_request(
                "Header X-Api-Key is missing for API Key validation",
            ))
        }
        Err(AuthFailure::Invalid) => {
            warn!(path = %req.uri().path(), "request with invalid api key");
            Err(AppError::forbidden("Error: Invalid API Key"))
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    chat_id: i64,
    chat_input: String,
}

#[derive(Debug, Deserialize)]
struct ResetBody {
    chat_id: i64,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Json<Vec<Reply>> {
    info!(
        chat_id = body.chat_id,
        input = %truncate_text(&body.chat_input, 200),
        "chat request"
    );
    let input = GraphInput::new(ChatId(body.chat_id), body.chat_input);
    Json(state.service.respond(input).await)
}

async fn reset(
    State(state): State<AppState>,
    Json(body): Json<ResetBody>,
) -> AppResult<Json<Vec<Reply>>> {
    info!(chat_id = body.chat_id, "reset request");
    let replies = state.service.reset(ChatId(body.chat_id)).await?;
    Ok(Json(replies))
}

async fn telegram_webhook(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> AppResult<Json<Value>> {
    let Some(msg) = message_from_update(raw) else {
        warn!("webhook update without chat information");
        return Err(AppError::bad_request("Chat information is required."));
    };
    let Some(handler) = state.telegram.clone() else {
        return Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Telegram is not configured",
        ));
    };

    info!(chat_id = msg.chat.id.0, "webhook update received");
    tokio::spawn(async move {
        handler.handle_message(&msg).await;
    });
    Ok(Json(json!({ "status": "Ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use labbot_core::{
        config::SecurityMode,
        memory::InMemoryCheckpointer,
        model::ChatMessage,
        pipeline::{Graph, GraphState, InputDigest, Node},
        Result,
    };
    use tower::ServiceExt;

    struct Shout;

    #[async_trait]
    impl Node for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        async fn run(&self, mut state: GraphState) -> Result<GraphState> {
            let answer = state.chat_input.to_uppercase();
            state
                .messages_history
                .push(ChatMessage::assistant(answer.clone()));
            state.formatted_output = vec![Reply::text(answer)];
            Ok(state)
        }
    }

    fn app() -> Router {
        let graph = Graph::new(Arc::new(InMemoryCheckpointer::new()))
            .then(Arc::new(InputDigest::new(10)))
            .then(Arc::new(Shout));
        router(AppState {
            service: ConversationService::new(Arc::new(graph)),
            telegram: None,
            guard: ApiKeyGuard::new(SecurityMode::ApiKey, Some("s3cret")).unwrap(),
        })
    }

    fn post_json(uri: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let resp = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"success": true}));
    }

    #[tokio::test]
    async fn missing_key_is_400_and_wrong_key_403() {
        let body = json!({"chat_id": 1, "chat_input": "oi"});
        let resp = app()
            .oneshot(post_json("/bot/chat", &[], body.clone()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app()
            .oneshot(post_json("/bot/chat", &[("X-Api-Key", "nope")], body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await, json!({"detail": "Error: Invalid API Key"}));
    }

    #[tokio::test]
    async fn chat_returns_replies() {
        let resp = app()
            .oneshot(post_json(
                "/bot/chat",
                &[("X-Api-Key", "s3cret")],
                json!({"chat_id": 5, "chat_input": "oi"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([{"output": "OI"}]));
    }

    #[tokio::test]
    async fn reset_confirms() {
        let resp = app()
            .oneshot(post_json(
                "/bot/reset",
                &[("X-Api-Key", "s3cret")],
                json!({"chat_id": 5}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!([{"output": "Conversa reiniciada!"}])
        );
    }

    #[tokio::test]
    async fn webhook_accepts_telegram_secret_and_rejects_bare_updates() {
        let resp = app()
            .oneshot(post_json(
                "/telegram/webhook",
                &[("X-Telegram-Bot-Api-Secret-Token", "s3cret")],
                json!({"update_id": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await,
            json!({"detail": "Chat information is required."})
        );
    }

    #[tokio::test]
    async fn telegram_secret_is_not_accepted_elsewhere() {
        let resp = app()
            .oneshot(post_json(
                "/bot/reset",
                &[("X-Telegram-Bot-Api-Secret-Token", "s3cret")],
                json!({"chat_id": 5}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_without_telegram_is_unavailable() {
        let update = json!({
            "update_id": 2,
            "message": {
                "message_id": 1,
                "date": 1_726_000_000,
                "chat": {"id": 42, "type": "private", "first_name": "Ana"},
                "text": "oi"
            }
        });
        let resp = app()
            .oneshot(post_json("/telegram/webhook", &[("X-Api-Key", "s3cret")], update))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

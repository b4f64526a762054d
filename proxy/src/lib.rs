pub mod body;
pub mod capture;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod registry;
pub(crate) mod shared;
pub mod sse;

use actix_web::{web, HttpRequest, HttpResponse};
use common::config::AppConfig;
use sqlx::SqlitePool;

use capture::CaptureMeta;
use control::Payload;
use dispatch::Exchange;
pub use error::CaptureError;
pub use registry::SessionRegistry;

/// Short per-exchange tag so interleaved log lines can be told apart.
fn exchange_tag() -> String {
    let mut tag = uuid::Uuid::new_v4().simple().to_string();
    tag.truncate(8);
    tag
}

/// Single entrypoint for every path and method: control payloads update the
/// routing table, anything else is captured and proxied upstream.
pub async fn entrypoint(
    req: HttpRequest,
    payload: web::Payload,
    pool: web::Data<SqlitePool>,
    client: web::Data<reqwest::Client>,
    registry: web::Data<SessionRegistry>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, CaptureError> {
    // The raw bytes go upstream untouched; only the decoded copy is inspected.
    let raw = body::read_raw(payload, config.max_body_bytes).await?;
    let decoded = body::decode(&req, &raw, config.max_body_bytes).await?;

    let chat = match control::classify(&decoded)? {
        Payload::Control(control) => {
            let route = registry.set_route(&control.id, &control.base_url);
            log::info!(
                "Session {} - routing to {}",
                route.session_id,
                route.upstream_base_url
            );
            return Ok(HttpResponse::Ok().finish());
        }
        Payload::Data(chat) => chat,
    };

    let route = registry.resolve(control::session_hint(&req).as_deref());
    let tag = exchange_tag();
    log::info!(
        "[{}] Session {} - Incoming {} request with {} messages",
        tag,
        route.session_id,
        if chat.stream { "streaming" } else { "buffered" },
        chat.messages.len()
    );

    // Inputs are stored before anything goes upstream.
    capture::capture_request(
        &CaptureMeta {
            pool: pool.get_ref(),
            session_id: &route.session_id,
            model: &chat.model,
            tag: &tag,
            preview_chars: config.log_preview_chars,
        },
        &chat.messages,
    )
    .await;

    let exchange = Exchange {
        req: &req,
        body: raw,
        route,
        model: chat.model,
        tag,
        pool,
        client: client.get_ref(),
        config: config.get_ref(),
    };

    if chat.stream {
        dispatch::forward_streaming(exchange).await
    } else {
        dispatch::forward_buffered(exchange).await
    }
}

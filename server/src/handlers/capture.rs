use actix_web::{web, HttpRequest, HttpResponse};
use common::config::AppConfig;
use proxy::{CaptureError, SessionRegistry};
use sqlx::SqlitePool;

pub async fn capture_catch_all(
    req: HttpRequest,
    payload: web::Payload,
    pool: web::Data<SqlitePool>,
    client: web::Data<reqwest::Client>,
    registry: web::Data<SessionRegistry>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, CaptureError> {
    proxy::entrypoint(req, payload, pool, client, registry, config).await
}

use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use common::config::AppConfig;
use common::models::SessionRoute;
use futures::channel::mpsc::UnboundedSender;
use futures::Stream;
use sqlx::SqlitePool;

use crate::capture::{self, CaptureMeta};
use crate::error::CaptureError;
use crate::shared::{
    buffered_target_url, forward_response_headers, is_event_stream, passthrough_headers,
    reverse_proxy_headers, streaming_target_url, to_actix_status, to_reqwest_method,
};
use crate::sse::{self, RelayEnd, StreamAccumulator};

/// One data request on its way upstream.
pub struct Exchange<'a> {
    pub req: &'a HttpRequest,
    /// Inbound body exactly as received.
    pub body: Bytes,
    pub route: SessionRoute,
    pub model: String,
    pub tag: String,
    pub pool: web::Data<SqlitePool>,
    pub client: &'a reqwest::Client,
    pub config: &'a AppConfig,
}

impl Exchange<'_> {
    fn meta(&self) -> CaptureMeta<'_> {
        CaptureMeta {
            pool: self.pool.get_ref(),
            session_id: &self.route.session_id,
            model: &self.model,
            tag: &self.tag,
            preview_chars: self.config.log_preview_chars,
        }
    }
}

/// Reverse-proxy the request and capture the buffered completion it returns.
pub async fn forward_buffered(ex: Exchange<'_>) -> Result<HttpResponse, CaptureError> {
    let target_url = buffered_target_url(
        &ex.route.upstream_base_url,
        ex.req.path(),
        &ex.config.default_completion_path,
        &ex.config.api_root,
    )?;
    log::info!(
        "[{}] {} {} -> {}",
        ex.tag,
        ex.req.method(),
        ex.req.path(),
        target_url
    );

    let upstream = ex
        .client
        .request(to_reqwest_method(ex.req.method())?, &target_url)
        .headers(reverse_proxy_headers(ex.req))
        .body(ex.body.clone())
        .send()
        .await
        .map_err(CaptureError::Upstream)?;

    let mut builder = HttpResponse::build(to_actix_status(upstream.status().as_u16())?);
    forward_response_headers(&mut builder, upstream.headers());

    if is_event_stream(upstream.headers()) {
        log::warn!(
            "[{}] Upstream streamed a non-streaming request, relaying without capture",
            ex.tag
        );
        return Ok(builder.streaming(upstream.bytes_stream()));
    }

    let response_body = upstream.bytes().await.map_err(CaptureError::UpstreamBody)?;
    capture::capture_completion(&ex.meta(), &response_body).await;

    Ok(builder.body(response_body))
}

/// Send the request upstream and relay its event stream while reassembling
/// the assistant message in the background.
pub async fn forward_streaming(ex: Exchange<'_>) -> Result<HttpResponse, CaptureError> {
    let target_url = streaming_target_url(
        &ex.route.upstream_base_url,
        &ex.config.default_completion_path,
    )?;
    log::info!(
        "[{}] {} {} -> {} (streaming)",
        ex.tag,
        ex.req.method(),
        ex.req.path(),
        target_url
    );

    let upstream = ex
        .client
        .request(to_reqwest_method(ex.req.method())?, &target_url)
        .headers(passthrough_headers(ex.req))
        .body(ex.body.clone())
        .send()
        .await
        .map_err(CaptureError::Upstream)?;

    let mut builder = HttpResponse::build(to_actix_status(upstream.status().as_u16())?);
    forward_response_headers(&mut builder, upstream.headers());

    if !is_event_stream(upstream.headers()) {
        log::debug!(
            "[{}] Upstream answered {} without an event stream, relaying as-is",
            ex.tag,
            upstream.status()
        );
        return Ok(builder.streaming(upstream.bytes_stream()));
    }

    let capture = StreamCapture {
        chunk_size: ex.config.stream_chunk_size,
        line_buffered: ex.config.line_buffered_capture,
        max_line_bytes: ex.config.max_body_bytes,
        preview_chars: ex.config.log_preview_chars,
        session_id: ex.route.session_id,
        pool: ex.pool,
        model: ex.model,
        tag: ex.tag,
    };

    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, actix_web::Error>>();
    actix_web::rt::spawn(capture.run(upstream.bytes_stream(), tx));

    Ok(builder.streaming(rx))
}

/// What a streamed exchange still needs once its response has been handed
/// back to the caller.
pub struct StreamCapture {
    pub pool: web::Data<SqlitePool>,
    pub session_id: String,
    pub model: String,
    pub tag: String,
    pub preview_chars: usize,
    pub chunk_size: usize,
    pub line_buffered: bool,
    pub max_line_bytes: usize,
}

impl StreamCapture {
    /// Relay `upstream` into `tx` and store the assistant text seen so far,
    /// however the relay ended. The caller's stream closes after that.
    pub async fn run<S, E>(
        self,
        upstream: S,
        tx: UnboundedSender<Result<Bytes, actix_web::Error>>,
    ) -> RelayEnd
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut acc = StreamAccumulator::new(self.line_buffered).with_max_line(self.max_line_bytes);
        let end = sse::relay(upstream, &tx, self.chunk_size, &mut acc).await;
        match &end {
            RelayEnd::Completed => log::debug!("[{}] Upstream stream completed", self.tag),
            RelayEnd::UpstreamFailed(e) => {
                log::warn!("[{}] Error reading stream: {}", self.tag, e)
            }
            RelayEnd::CallerGone => log::info!("[{}] Caller disconnected mid-stream", self.tag),
        }

        if let Some(text) = acc.finish() {
            let meta = CaptureMeta {
                pool: self.pool.get_ref(),
                session_id: &self.session_id,
                model: &self.model,
                tag: &self.tag,
                preview_chars: self.preview_chars,
            };
            capture::persist_assistant(&meta, &self.model, &text).await;
        }

        drop(tx);
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::Role;
    use futures::channel::mpsc;

    const FIRST: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n";
    const SECOND: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n";

    async fn stream_capture() -> StreamCapture {
        StreamCapture {
            pool: web::Data::new(db::init_pool(db::MEMORY_DB).await.unwrap()),
            session_id: "s1".to_string(),
            model: "m".to_string(),
            tag: "t".to_string(),
            preview_chars: 200,
            chunk_size: 4096,
            line_buffered: false,
            max_line_bytes: 1024,
        }
    }

    #[actix_web::test]
    async fn completed_stream_is_stored() {
        let capture = stream_capture().await;
        let pool = capture.pool.clone();
        let upstream = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(FIRST.as_bytes())),
            Ok(Bytes::from_static(SECOND.as_bytes())),
        ]);
        let (tx, _rx) = mpsc::unbounded();

        assert_eq!(capture.run(upstream, tx).await, RelayEnd::Completed);
        let rows = db::list_messages(pool.get_ref(), "s1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::Assistant);
        assert_eq!(rows[0].content, "hello");
    }

    #[actix_web::test]
    async fn text_seen_before_caller_left_is_stored() {
        let capture = stream_capture().await;
        let pool = capture.pool.clone();
        let (tx, rx) = mpsc::unbounded();

        // The caller goes away after the first event has been relayed.
        let upstream = futures::stream::unfold((0, Some(rx)), |(step, mut rx)| async move {
            match step {
                0 => Some((
                    Ok::<_, std::io::Error>(Bytes::from_static(FIRST.as_bytes())),
                    (1, rx),
                )),
                1 => {
                    drop(rx.take());
                    Some((Ok(Bytes::from_static(SECOND.as_bytes())), (2, rx)))
                }
                _ => None,
            }
        });

        assert_eq!(capture.run(upstream, tx).await, RelayEnd::CallerGone);
        let rows = db::list_messages(pool.get_ref(), "s1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "he");
    }
}

use actix_web::dev::Decompress;
use actix_web::error::PayloadError;
use actix_web::{web, HttpRequest};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::CaptureError;

async fn collect_limited<S>(stream: S, limit: usize) -> Result<Bytes, CaptureError>
where
    S: Stream<Item = Result<Bytes, PayloadError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Err(CaptureError::BodyTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Inbound body exactly as it came off the wire, still content-encoded.
pub async fn read_raw(payload: web::Payload, limit: usize) -> Result<Bytes, CaptureError> {
    collect_limited(payload, limit).await
}

/// Decoded view of `raw` according to the request's `Content-Encoding`.
/// Bodies without an encoding the server understands come back unchanged.
pub async fn decode(req: &HttpRequest, raw: &Bytes, limit: usize) -> Result<Bytes, CaptureError> {
    if !req
        .headers()
        .contains_key(actix_web::http::header::CONTENT_ENCODING)
    {
        return Ok(raw.clone());
    }
    let source = futures::stream::once(futures::future::ready(Ok::<_, PayloadError>(raw.clone())));
    collect_limited(Decompress::from_headers(source, req.headers()), limit).await
}

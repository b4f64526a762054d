use bytes::Bytes;
use common::models::ChatCompletionChunk;
use futures::channel::mpsc::UnboundedSender;
use futures::{Stream, StreamExt};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_LINE: &str = "data: [DONE]";

/// Rebuilds the assistant text of a streamed chat completion from the raw
/// event-stream bytes.
///
/// By default every chunk is scanned on its own: a `data:` line cut in half by
/// a chunk boundary is lost for capture. With `line_buffered` set the
/// unterminated tail of each chunk is carried into the next one and flushed by
/// [`StreamAccumulator::finish`].
pub struct StreamAccumulator {
    fragments: Vec<String>,
    line_buffered: bool,
    pending: Vec<u8>,
    max_line_bytes: usize,
    /// Set while the rest of an over-long line is being thrown away.
    discarding: bool,
}

impl StreamAccumulator {
    pub fn new(line_buffered: bool) -> Self {
        StreamAccumulator {
            fragments: Vec::new(),
            line_buffered,
            pending: Vec::new(),
            max_line_bytes: usize::MAX,
            discarding: false,
        }
    }

    /// Cap on an unterminated line carried between chunks. A line that grows
    /// past it is dropped up to its newline.
    pub fn with_max_line(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.line_buffered {
            self.feed_buffered(chunk);
        } else {
            let text = String::from_utf8_lossy(chunk);
            for line in text.split('\n') {
                self.absorb_line(line);
            }
        }
    }

    fn feed_buffered(&mut self, chunk: &[u8]) {
        // Bytes already in `pending` hold no newline, so only the new ones are searched.
        let mut search = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(offset) = self.pending[search..].iter().position(|&b| b == b'\n') {
            let end = search + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                let line = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
                self.absorb_line(&line);
            }
            start = end + 1;
            search = start;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.max_line_bytes {
            if !self.discarding {
                log::warn!(
                    "Dropping stream line longer than {} bytes from capture",
                    self.max_line_bytes
                );
            }
            self.pending.clear();
            self.discarding = true;
        }
    }

    fn absorb_line(&mut self, line: &str) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line == DONE_LINE {
            return;
        }
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(event) => {
                for choice in event.choices {
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        self.fragments.push(content);
                    }
                }
            }
            Err(e) => log::trace!("Skipping unparsable stream line: {}", e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Concatenated text, or `None` if no content was seen.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() && !self.discarding {
            let tail = std::mem::take(&mut self.pending);
            let tail = String::from_utf8_lossy(&tail).into_owned();
            self.absorb_line(&tail);
        }
        if self.fragments.is_empty() {
            None
        } else {
            Some(self.fragments.concat())
        }
    }
}

/// Split `bytes` into consecutive slices of at most `size` bytes.
pub fn fixed_chunks(mut bytes: Bytes, size: usize) -> impl Iterator<Item = Bytes> {
    let size = size.max(1);
    std::iter::from_fn(move || {
        if bytes.is_empty() {
            None
        } else {
            let n = size.min(bytes.len());
            Some(bytes.split_to(n))
        }
    })
}

/// Why a relay stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayEnd {
    /// Upstream closed the body.
    Completed,
    /// Upstream read failed; bytes already sent stay sent.
    UpstreamFailed(String),
    /// The caller's side of the channel is gone.
    CallerGone,
}

/// Forward `upstream` to the caller chunk by chunk, feeding each chunk to
/// `acc` after it has been handed to the caller.
pub async fn relay<S, E>(
    upstream: S,
    tx: &UnboundedSender<Result<Bytes, actix_web::Error>>,
    chunk_size: usize,
    acc: &mut StreamAccumulator,
) -> RelayEnd
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    while let Some(item) = upstream.next().await {
        match item {
            Ok(bytes) => {
                for chunk in fixed_chunks(bytes, chunk_size) {
                    if tx.unbounded_send(Ok(chunk.clone())).is_err() {
                        return RelayEnd::CallerGone;
                    }
                    acc.feed(&chunk);
                }
            }
            Err(e) => return RelayEnd::UpstreamFailed(e.to_string()),
        }
    }
    RelayEnd::Completed
}

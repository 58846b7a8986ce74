use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;

use crate::errors::{TransportError, TransportErrorKind};

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Builds a default-named frame carrying `data`.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }
}

/// Largest partial frame the decoder buffers before giving up on the
/// connection.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Incremental decoder: feed arbitrary byte chunks, get complete frames.
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already searched for a delimiter.
    scanned: usize,
    max_frame: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn with_max_frame_bytes(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame: max_frame.max(1),
        }
    }

    /// Appends `chunk` and returns every frame it completed.
    ///
    /// Fails once an unterminated frame grows past the size limit; the
    /// buffered bytes are discarded.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, TransportError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            if let Some(frame) = parse_sse_frame(&self.buf[start..idx]) {
                frames.push(frame);
            }
            start = idx + delim_len;
            from = start;
        }
        self.buf.drain(..start);
        // A delimiter may straddle the next chunk by up to three bytes.
        self.scanned = self.buf.len().saturating_sub(3);

        if self.buf.len() > self.max_frame {
            let size = self.buf.len();
            self.buf.clear();
            self.scanned = 0;
            return Err(TransportError::new(
                TransportErrorKind::Body,
                format!("sse frame exceeds {} bytes ({size} buffered)", self.max_frame),
            ));
        }
        Ok(frames)
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn field_value(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            frame.event = Some(field_value(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(field_value(rest));
        } else if let Some(rest) = line.strip_prefix("id:") {
            let id = field_value(rest);
            // Ids containing NUL are ignored per the SSE processing model.
            if !id.contains('\0') {
                frame.id = Some(id.to_string());
            }
        }
    }
    if frame.event.is_none() && frame.id.is_none() && data_lines.is_empty() {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}

pub type FrameStream =
    Pin<Box<dyn futures::Stream<Item = Result<SseFrame, TransportError>> + Send + 'static>>;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Adapts a byte stream into a stream of decoded frames.
pub fn frame_stream<S, E>(bytes: S) -> FrameStream
where
    S: futures::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError>,
{
    struct State {
        bytes: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        done: bool,
    }

    let bytes: ByteStream = Box::pin(bytes.map(|chunk| chunk.map_err(Into::into)));
    Box::pin(stream::try_unfold(
        State {
            bytes,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk)?);
                    }
                    Some(Err(e)) => return Err(e),
                    None => state.done = true,
                }
            }
        },
    ))
}

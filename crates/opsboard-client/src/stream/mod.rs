//! Live push streams: SSE decoding, subscriptions, reconnection and the
//! per-key registry.

mod event;
mod history;
mod hub;
mod reconnect;
mod source;
mod sse;
mod subscription;

pub use event::{EventParseError, RunEvent};
pub use history::EventHistory;
pub use hub::StreamHub;
pub use reconnect::ReconnectPolicy;
pub use source::{EventSource, SseEventSource, StreamRequest};
pub use sse::{FrameStream, MAX_FRAME_BYTES, SseDecoder, SseFrame, frame_stream};
pub use subscription::{
    ConnectionState, StreamDiagnostic, Subscription, SubscriptionCloser, SubscriptionOptions,
    SubscriptionStatus,
};

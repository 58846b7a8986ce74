//! Types most data sources and views need.
pub use crate::stream::{
    ConnectionState, EventSource, ReconnectPolicy, RunEvent, SseEventSource, StreamHub,
    StreamRequest, Subscription, SubscriptionStatus,
};
pub use crate::{
    AbortHandle, ApiClient, ClientConfig, ErrorKind, RequestConfig, TypedError, abort_pair,
};

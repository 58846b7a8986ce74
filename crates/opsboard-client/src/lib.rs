//! Data-access core for the opsboard operations dashboard.
//!
//! Every backend call goes through one [`ApiClient`]: paths are normalized
//! against the configured base path, request interceptors stamp ids and
//! headers, responses are unwrapped from the `{ ok, data | error, meta }`
//! envelope, and every failure comes back as a single [`TypedError`].
//! Live run logs and events arrive through [`stream::Subscription`]s.
//!
//! ```no_run
//! use opsboard_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::builder(ClientConfig::from_env()?).build()?;
//! let summary: serde_json::Value = client.get_json("/audit/summary").await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

/// Cancellation handles for calls and subscriptions.
pub mod abort;
/// The HTTP client state machine and its builder.
pub mod client;
/// Client configuration and environment loading.
pub mod config;
/// Response envelope detection and unwrapping.
pub mod envelope;
/// Error taxonomy and status/code mapping.
pub mod errors;
/// Request, response and error interceptors.
pub mod interceptor;
/// Global tracing setup.
pub mod observability;
/// Common imports.
pub mod prelude;
/// Request description and path normalization.
pub mod request;
/// Live event streams.
pub mod stream;
/// Wire transport seam and the reqwest implementation.
pub mod transport;

pub use abort::{AbortHandle, AbortSignal, abort_pair};
pub use client::{ApiClient, ApiClientBuilder, CallState};
pub use config::ClientConfig;
pub use envelope::{Detected, Envelope, EnvelopeMeta, ErrorDetail};
pub use errors::{
    ConfigError, ErrorCause, ErrorKind, InterceptorError, TransportError, TransportErrorKind,
    TypedError, kind_for_status, map_error, map_transport_error,
};
pub use interceptor::{
    EnvelopeInterceptor, ErrorInterceptor, HeaderInterceptor, InterceptorChain,
    RequestIdInterceptor, RequestInterceptor, ResponseInterceptor, TracingErrorInterceptor,
};
pub use request::{RequestConfig, normalize_path};
pub use transport::{ReqwestTransport, ResponseBody, Transport, TransportRequest, TransportResponse};

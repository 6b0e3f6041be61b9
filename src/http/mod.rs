//! Outbound HTTP: transport, retry policy and the dispatching client.

mod client;
mod retry;
mod transport;

pub use client::Client;
pub use retry::{RETRY_METHODS, RETRY_STATUSES, RetryPolicy, is_retryable};
pub use transport::{
    APPLICATION_ID_HEADER, ErrorResponse, ReqwestTransport, RequestContext, Transport,
    TransportError,
};

#[cfg(test)]
pub use transport::MockTransport;

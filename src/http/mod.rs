//! HTTP pipeline transport.
//!
//! Statements are sent to `{base}/v2/pipeline` as JSON with a bearer token. Results come
//! back fully buffered in a [`RowTable`].
//!
//! Transactions cannot be expressed: every request is its own stream and is closed
//! in the same call.

mod client;
mod table;
pub mod wire;

pub use client::{HttpClientConfig, HttpTransport, PIPELINE_PATH, build_http_client, normalize_url};
pub use table::RowTable;
pub use wire::decode_response;

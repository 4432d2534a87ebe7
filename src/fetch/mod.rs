//! Request interception: strategy dispatch, the network client seam, and
//! the fixed offline fallback payloads.

mod client;
mod fallback;
mod interceptor;
mod types;

pub use client::{NetworkClient, ReqwestClient};
#[cfg(test)]
pub use client::ScriptedNetwork;
pub use fallback::CACHE_MARKER_HEADER;
pub use interceptor::RequestInterceptor;
pub use types::{Destination, Method, Request, Response};

//! Upstream network access and the request/response model.

mod client;
mod types;

pub use client::{HttpClient, Network};
pub use types::{Destination, RedirectMode, Request, RequestMode, Response, ResponseType};

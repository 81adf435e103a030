//! HTTP transfers with bounded retry and a fixed-size worker pool.

mod client;
mod engine;
mod request;
mod retry;

pub use client::{HttpClient, HttpResponse, ReqwestClient};
pub use engine::TransferEngine;
pub use request::{DownloadRequest, UploadRequest};
pub use retry::{is_transient, RetryPolicy};

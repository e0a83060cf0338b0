//! REST API client module for the prescription analysis service.
//!
//! This module provides the `ApiClient` for registering, logging in,
//! uploading prescription images and browsing past analyses.
//!
//! Every request carries the stored access credential as a bearer token.
//! An expired access credential is renewed once per request through the
//! refresh endpoint; concurrent renewals are coalesced into a single call.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::{ApiError, ApiResult};
pub use request::{ApiRequest, FileUpload, RequestBody};

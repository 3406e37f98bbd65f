//! Civic Portal Client
//!
//! A Rust client library for the civic portal API (documents, chat
//! assistant, parking payment, profile), with bearer-token authentication,
//! single-flight token refresh with a bounded retry, and a session
//! lifecycle broadcast for reacting to forced logouts.

pub mod client;
pub mod credential_store;
pub mod error;
pub mod refresh;
pub mod session;
pub mod types;

pub use client::{
    ApiResponse, MultipartField, PortalClient, PortalClientConfig, RequestBody,
    RequestDescriptor, RequestOptions, ResponseBody, ResponseType,
};
pub use credential_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ClientError, Result};
pub use refresh::RefreshCoordinator;
pub use session::{LogoutReason, SessionEvent, SessionEvents};

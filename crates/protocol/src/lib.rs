//! # termdeck Protocol Library
//!
//! Wire types for the termdeck HTTP control surface.
//!
//! ## Overview
//!
//! The daemon exposes its session registry as a small JSON API. This crate
//! holds everything both ends of that API need to agree on:
//!
//! - **Session kinds**: [`SessionType`] and [`SessionMode`], with their wire names
//! - **Messages**: request and response bodies for every endpoint
//! - **Errors**: the JSON error body and enum parse errors
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{CreateSessionRequest, SessionType};
//!
//! let kind: SessionType = "resume".parse().unwrap();
//! assert_eq!(kind.persisted(), SessionType::Claude);
//!
//! let req = CreateSessionRequest {
//!     session_type: kind.to_string(),
//!     workdir: "/work/app".to_string(),
//!     resume_id: Some("0b5c".to_string()),
//! };
//! let body = serde_json::to_string(&req).unwrap();
//! assert!(body.contains("\"type\":\"resume\""));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request/response definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ApiErrorBody, ParseError};
pub use messages::{
    BridgePortResponse, CreateSessionRequest, CreateSessionResponse, DirectoriesResponse,
    HealthResponse, ListSessionsResponse, RenameSessionRequest, ResumableConversation,
    ResumableResponse, SelectedFolder, SessionMode, SessionRecordResponse, SessionType,
    SessionView, SetOrderRequest, StartupState, UpdateSessionRequest, API_VERSION,
};

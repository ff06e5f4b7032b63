//! Logical sessions.
//!
//! A logical session ties together a multiplexer session, the bridge that
//! exposes it to the browser, and its stored metadata, all keyed by name.
//! [`SessionRegistry`] is the only component that changes any of them.

pub mod naming;
pub mod reconciler;
pub mod registry;
pub mod startup;

pub use naming::{dir_label, generate_name, is_valid_name};
pub use reconciler::{reconcile, ReconcileReport};
pub use registry::{
    clean_title, CreateOutcome, LogicalSession, RegistryError, RegistryOptions, SessionRegistry,
    StartupStatus,
};
pub use startup::{is_safe_resume_id, StartupCommands};

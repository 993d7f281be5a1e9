//! Dependency injection providers for service management.
//!
//! The shared [`AppState`](crate::app_context::AppState) comes from
//! [`AppStateProvider`]; each background service is a [`ServiceProvider`]
//! started by the coordinator in priority order.

pub mod app_state;
pub mod dbus;
pub mod startup;
pub mod status;
pub mod traits;

pub use app_state::AppStateProvider;
pub use dbus::DBusServiceProvider;
pub use startup::StartupServiceProvider;
pub use status::StatusServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};

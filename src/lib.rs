//! # coolctld
//!
//! A Linux daemon that applies cooling and lighting profiles to every
//! controller it can find, across several hardware backends.
//!
//! ## Features
//!
//! - **Backend registry**: priority-ordered discovery with sysfs-path
//!   deduplication, so one physical device is never driven by two backends
//! - **Profile application**: per-device ordering that respects modes without
//!   colors, modes that need one, and whole-device sync effects
//! - **Backends**: Thermaltake Riing Quad over HID, motherboard PWM over hwmon
//! - **Profiles**: named JSON profiles plus the restored current state
//! - **D-Bus Interface**: rescans, profile management, single-channel changes
//!
//! ## Architecture
//!
//! The core ([`registry`], [`applier`], [`profile`], [`modes`]) is synchronous
//! and owns no global state. The daemon wraps it with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Devices, snapshot and store behind one lock
//! - Service providers for startup, status refresh and D-Bus
//!
//! ## Example
//!
//! ```no_run
//! use coolctld::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod applier;
pub mod application;
pub mod backend;
pub mod color;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod drivers;
pub mod error;
pub mod event;
pub mod interface;
pub mod modes;
pub mod profile;
pub mod providers;
pub mod registry;
pub mod store;
pub mod task_manager;

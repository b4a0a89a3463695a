//! # hookbus
//!
//! Webhook event dispatch and per-installation context management for
//! cloud automation platforms.
//!
//! ## Overview
//!
//! `hookbus` receives lifecycle and event callbacks from an automation
//! platform, authenticates them via asymmetric request signatures,
//! resolves them to a durable per-installation context, routes each
//! event to a registered handler, and aggregates all handler results
//! into a single response. Storage and transport are pluggable: swap
//! context stores (in-memory, file, your own) and response sinks
//! without changing handler code.
//!
//! ## Quick Start
//!
//! ```rust
//! use hookbus::{MemoryContextStore, WebhookApp};
//!
//! # async fn example() -> hookbus::Result<()> {
//! // Configure the app once at startup
//! let app = WebhookApp::new()
//!     .with_context_store(MemoryContextStore::new())
//!     .scheduled_event_handler("dailyCheck", |ctx, event| async move {
//!         println!("schedule {} fired for {}", event.name, ctx.installed_app_id());
//!         Ok(())
//!     });
//!
//! // Feed it webhook bodies from your transport of choice
//! let body = serde_json::to_vec(&serde_json::json!({
//!     "messageType": "EVENT",
//!     "eventData": {
//!         "installedApp": {"installedAppId": "ia1"},
//!         "events": [{"eventType": "TIMER_EVENT", "timerEvent": {"name": "dailyCheck"}}]
//!     }
//! }))?;
//! let response = app.handle_unverified_request(&body).await;
//! assert_eq!(response.status_code, 200);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **WebhookApp** — configuration surface and dispatch entry points
//! - **SignatureVerifier** — cached asymmetric-key request authentication
//! - **ContextStore** trait — durable installation credentials + state
//! - **InstalledAppContext** — per-installation API client, state, and mutex
//! - **Responder** trait — response sink for any transport

pub mod api;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod responder;
pub mod signature;
pub mod state;
pub mod store;
pub mod types;

// Re-export core types
pub use api::{ApiClient, ApiSettings};
pub use context::InstalledAppContext;
pub use dispatcher::WebhookApp;
pub use error::{DispatchError, Result};
pub use registry::{HandlerRegistry, MODE_CHANGE_HANDLER, SECURITY_ARM_STATE_HANDLER};
pub use responder::{CapturingResponder, ChannelResponder, Responder};
pub use signature::{HttpKeySource, KeySource, SignatureVerifier, SignedRequest};
pub use state::InstalledState;
pub use types::{
    ConfirmationData, DeviceCommand, DeviceCommandsEvent, DeviceEvent, DispatchResponse, Envelope,
    Event, EventData, InstalledAppLifecycle, InstalledAppLifecycleEvent, InstalledAppRef,
    MessageType, ModeEvent, SecurityArmStateEvent, TimerEvent,
};

// Re-export stores for convenience
pub use store::file::FileContextStore;
pub use store::memory::MemoryContextStore;
pub use store::{ContextPatch, ContextRecord, ContextStore};

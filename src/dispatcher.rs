//! Webhook app — configuration surface and dispatch state machine
//!
//! `WebhookApp` is configured once at startup (handler registration,
//! stores, verification keys, platform endpoints) and then serves
//! inbound callbacks: authenticate, classify the message type,
//! resolve the installation context, route each event to its handler,
//! and aggregate every collected result into one response.
//!
//! Handlers within one envelope are started eagerly in array order
//! and awaited together; completion order is not guaranteed. One
//! handler failing — or having no registration — never prevents its
//! siblings from completing, and the envelope is still acknowledged
//! with `{statusCode: 200, eventData: {}}`: failures surface through
//! logs and the configured error callback, matching at-least-once
//! delivery.

use crate::api::ApiSettings;
use crate::context::{InstalledAppContext, MutexRegistry};
use crate::error::{DispatchError, Result};
use crate::registry::{
    subscription_key, HandlerFuture, HandlerRegistry, MODE_CHANGE_HANDLER,
    SECURITY_ARM_STATE_HANDLER,
};
use crate::responder::{CapturingResponder, Responder};
use crate::signature::{KeySource, SignatureVerifier, SignedRequest};
use crate::store::ContextStore;
use crate::types::{
    ConfirmationData, DeviceCommand, DeviceCommandsEvent, DeviceEvent, DispatchResponse, Envelope,
    Event, EventData, InstalledAppLifecycle, InstalledAppLifecycleEvent, MessageType, ModeEvent,
    SecurityArmStateEvent, TimerEvent,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type ErrorCallback = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Webhook-driven app: handler registration plus event dispatch
pub struct WebhookApp {
    registry: HandlerRegistry,
    store: Option<Arc<dyn ContextStore>>,
    api_settings: Option<ApiSettings>,
    verifier: Option<SignatureVerifier>,
    error_callback: Option<ErrorCallback>,
    dispatch_timeout: Option<Duration>,
    mutexes: Arc<MutexRegistry>,
    http: reqwest::Client,
}

impl Default for WebhookApp {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookApp {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            store: None,
            api_settings: None,
            verifier: None,
            error_callback: None,
            dispatch_timeout: None,
            mutexes: Arc::new(MutexRegistry::default()),
            http: reqwest::Client::new(),
        }
    }

    // ─── Configuration ───────────────────────────────────────────

    /// Durable store for installation credentials and state
    pub fn with_context_store(mut self, store: impl ContextStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Like [`with_context_store`](Self::with_context_store), for a
    /// store handle shared with other parts of the host process
    pub fn with_shared_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Platform endpoints for the per-installation API client
    pub fn with_api(mut self, settings: ApiSettings) -> Self {
        self.api_settings = Some(settings);
        self
    }

    /// Verify signed requests with keys fetched from this source
    pub fn with_key_source(mut self, source: impl KeySource + 'static) -> Self {
        self.verifier = Some(SignatureVerifier::new(source));
        self
    }

    /// Verify signed requests against one injected public key,
    /// bypassing key-id resolution
    pub fn with_static_public_key(mut self, pem: &str) -> Result<Self> {
        self.verifier = Some(SignatureVerifier::with_static_key(pem)?);
        Ok(self)
    }

    /// Overall deadline for one envelope's handler aggregation
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    /// Callback invoked for every dispatch-time failure
    pub fn on_error(mut self, callback: impl Fn(&DispatchError) + Send + Sync + 'static) -> Self {
        self.error_callback = Some(Arc::new(callback));
        self
    }

    // ─── Handler registration ────────────────────────────────────

    /// Handle device events for subscriptions whose name starts with
    /// `name` (the part before the first `_`)
    pub fn subscribed_event_handler<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_subscribed(name, Arc::new(move |ctx, event| {
                Box::pin(handler(ctx, event))
            }));
        self
    }

    /// Handle timer events for the schedule with this exact name
    pub fn scheduled_event_handler<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, TimerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_scheduled(name, Arc::new(move |ctx, event| {
                Box::pin(handler(ctx, event))
            }));
        self
    }

    /// Handle a device command registered as
    /// `componentId/capability/command` or `capability/command`
    pub fn device_command_handler<F, Fut>(mut self, key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, DeviceCommandsEvent, DeviceCommand) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_command(key, Arc::new(move |ctx, event, command| {
                Box::pin(handler(ctx, event, command))
            }));
        self
    }

    /// Handle whole commands events, overriding per-command routing
    pub fn device_commands_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, DeviceCommandsEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_commands_catch_all(Arc::new(move |ctx, event| {
                Box::pin(handler(ctx, event))
            }));
        self
    }

    /// Fallback for commands no per-command handler matched;
    /// replaces the built-in warning
    pub fn default_device_command_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DeviceCommandsEvent, &DeviceCommand) + Send + Sync + 'static,
    {
        self.registry.register_default_command(Arc::new(handler));
        self
    }

    /// Handle lifecycle `DELETE` events for this app's installations
    pub fn uninstalled_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, InstalledAppLifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_uninstalled(Arc::new(move |ctx, event| {
                Box::pin(handler(ctx, event))
            }));
        self
    }

    /// Handle mode-change events (fixed-name registration — the wire
    /// payload carries no subscription name for these)
    pub fn mode_change_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, ModeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_mode_change(Arc::new(move |ctx, event| {
                Box::pin(handler(ctx, event))
            }));
        self
    }

    /// Handle security arm-state events (fixed-name registration)
    pub fn security_arm_state_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<InstalledAppContext>, SecurityArmStateEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .register_security_arm_state(Arc::new(move |ctx, event| {
                Box::pin(handler(ctx, event))
            }));
        self
    }

    // ─── Entry points ────────────────────────────────────────────

    /// Handle a signed transport request: verify, then dispatch
    ///
    /// Authentication failure short-circuits before any dispatch work
    /// with status 401 and body `Forbidden`.
    pub async fn handle_signed_request(&self, request: &SignedRequest) -> DispatchResponse {
        let verifier = match &self.verifier {
            Some(verifier) => verifier,
            None => {
                tracing::error!(
                    "No verification key configured; rejecting signed request"
                );
                return DispatchResponse::forbidden();
            }
        };

        if !verifier.is_authorized(request).await {
            tracing::warn!(path = %request.path, "Rejected unauthorized request");
            return DispatchResponse::forbidden();
        }

        self.handle_body(&request.body).await
    }

    /// Handle a transport request that carries no signature
    pub async fn handle_unverified_request(&self, body: &[u8]) -> DispatchResponse {
        self.handle_body(body).await
    }

    async fn handle_body(&self, body: &[u8]) -> DispatchResponse {
        let envelope: Envelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse envelope body");
                return DispatchResponse {
                    status_code: 400,
                    event_data: None,
                    message: Some("Bad Request".to_string()),
                };
            }
        };

        match self.handle_event(envelope).await {
            Ok(response) => response,
            Err(e) => {
                self.report(&e);
                DispatchResponse {
                    status_code: 500,
                    event_data: None,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Dispatch an already-parsed envelope, returning the response
    /// directly (in-process entry point, no transport)
    pub async fn handle_event(&self, envelope: Envelope) -> Result<DispatchResponse> {
        let mut responder = CapturingResponder::new();
        self.dispatch(envelope, &mut responder).await?;
        responder.into_response().ok_or_else(|| {
            DispatchError::Config("Dispatch completed without producing a response".to_string())
        })
    }

    /// Dispatch an envelope, emitting the single aggregated response
    /// through the given responder
    pub async fn dispatch(&self, envelope: Envelope, responder: &mut dyn Responder) -> Result<()> {
        match envelope.message_type {
            MessageType::Event => {
                let event_data = envelope.event_data.ok_or_else(|| {
                    DispatchError::Config("EVENT message without eventData".to_string())
                })?;
                self.dispatch_events(event_data).await?;
            }
            MessageType::Confirmation => {
                self.handle_confirmation(envelope.confirmation_data).await;
            }
            MessageType::Execute | MessageType::Unknown => {
                tracing::warn!(
                    message_type = ?envelope.message_type,
                    "Ignoring unsupported message type"
                );
            }
        }

        responder.respond(DispatchResponse::ok()).await
    }

    /// Resolve an installation context by id from the context store
    pub async fn with_context(&self, installed_app_id: &str) -> Result<Arc<InstalledAppContext>> {
        let store = self.store.as_ref().ok_or_else(|| {
            DispatchError::Config("No context store configured".to_string())
        })?;
        let record = store
            .get(installed_app_id)
            .await?
            .ok_or_else(|| DispatchError::UnknownInstallation(installed_app_id.to_string()))?;
        Ok(InstalledAppContext::from_record(
            record,
            self.store.clone(),
            self.api_settings.clone(),
            self.mutexes.for_installation(installed_app_id),
        ))
    }

    // ─── Event routing ───────────────────────────────────────────

    async fn dispatch_events(&self, event_data: EventData) -> Result<()> {
        let mutex = self
            .mutexes
            .for_installation(&event_data.installed_app.installed_app_id);
        let context = InstalledAppContext::from_event_data(
            &event_data,
            self.store.clone(),
            self.api_settings.clone(),
            mutex,
        );

        tracing::debug!(
            installed_app_id = %context.installed_app_id(),
            events = event_data.events.len(),
            "Dispatching envelope"
        );

        // Handlers start in array order; completions are awaited
        // together below.
        let mut pending: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();

        for event in event_data.events {
            match event {
                Event::Device { device_event } => {
                    let key = subscription_key(&device_event.subscription_name).to_string();
                    match self.registry.subscribed(&key) {
                        Some(handler) => {
                            self.collect(&mut pending, key, handler(context.clone(), device_event))
                        }
                        None => self.report(&DispatchError::MissingHandler(key)),
                    }
                }

                Event::Timer { timer_event } => {
                    let key = timer_event.name.clone();
                    match self.registry.scheduled(&key) {
                        Some(handler) => {
                            self.collect(&mut pending, key, handler(context.clone(), timer_event))
                        }
                        None => self.report(&DispatchError::MissingHandler(key)),
                    }
                }

                Event::DeviceCommands {
                    device_commands_event,
                } => self.dispatch_commands(&context, device_commands_event, &mut pending),

                Event::Mode { mode_event } => match self.registry.mode_change() {
                    Some(handler) => self.collect(
                        &mut pending,
                        MODE_CHANGE_HANDLER.to_string(),
                        handler(context.clone(), mode_event),
                    ),
                    None => {
                        self.report(&DispatchError::MissingHandler(MODE_CHANGE_HANDLER.into()))
                    }
                },

                Event::SecurityArmState {
                    security_arm_state_event,
                } => match self.registry.security_arm_state() {
                    Some(handler) => self.collect(
                        &mut pending,
                        SECURITY_ARM_STATE_HANDLER.to_string(),
                        handler(context.clone(), security_arm_state_event),
                    ),
                    None => self.report(&DispatchError::MissingHandler(
                        SECURITY_ARM_STATE_HANDLER.into(),
                    )),
                },

                Event::InstalledAppLifecycle {
                    installed_app_lifecycle_event,
                } => self.dispatch_lifecycle(&context, installed_app_lifecycle_event),

                Event::Unknown => {
                    tracing::warn!("Unhandled event type in envelope");
                }
            }
        }

        self.join_pending(pending).await
    }

    fn dispatch_commands(
        &self,
        context: &Arc<InstalledAppContext>,
        event: DeviceCommandsEvent,
        pending: &mut Vec<(String, JoinHandle<Result<()>>)>,
    ) {
        if let Some(handler) = self.registry.commands_catch_all() {
            self.collect(
                pending,
                "deviceCommandsHandler".to_string(),
                handler(context.clone(), event),
            );
            return;
        }

        for command in event.commands.clone() {
            match self.registry.command(&command) {
                Some(handler) => {
                    let key = format!(
                        "{}/{}/{}",
                        command.component_id, command.capability, command.command
                    );
                    self.collect(
                        pending,
                        key,
                        handler(context.clone(), event.clone(), command),
                    );
                }
                None => match self.registry.default_command() {
                    // The default has no asynchronous contract — it
                    // runs inline and is not collected
                    Some(default) => default(&event, &command),
                    None => tracing::warn!(
                        device_id = %event.device_id,
                        component_id = %command.component_id,
                        capability = %command.capability,
                        command = %command.command,
                        "No handler registered for device command"
                    ),
                },
            }
        }
    }

    fn dispatch_lifecycle(
        &self,
        context: &Arc<InstalledAppContext>,
        event: InstalledAppLifecycleEvent,
    ) {
        if event.lifecycle != InstalledAppLifecycle::Delete {
            tracing::info!(
                lifecycle = ?event.lifecycle,
                installed_app_id = %event.installed_app_id,
                "Ignoring installed app lifecycle event"
            );
            return;
        }

        // Fire-and-forget: the uninstall handler is not part of the
        // awaited result set, and the stored context goes with it.
        let handler = self.registry.uninstalled().cloned();
        let store = self.store.clone();
        let mutexes = self.mutexes.clone();
        let context = context.clone();
        tokio::spawn(async move {
            if let Some(handler) = handler {
                if let Err(e) = handler(context.clone(), event).await {
                    tracing::error!(
                        installed_app_id = %context.installed_app_id(),
                        error = %e,
                        "Uninstalled handler failed"
                    );
                }
            }
            if let Some(store) = store {
                if let Err(e) = store.delete(context.installed_app_id()).await {
                    tracing::error!(
                        installed_app_id = %context.installed_app_id(),
                        error = %e,
                        "Failed to delete stored context after uninstall"
                    );
                }
            }
            mutexes.remove(context.installed_app_id());
        });
    }

    /// Start a handler eagerly and add it to the awaited set
    fn collect(
        &self,
        pending: &mut Vec<(String, JoinHandle<Result<()>>)>,
        name: String,
        future: HandlerFuture,
    ) {
        pending.push((name, tokio::spawn(future)));
    }

    /// Await every collected handler; failures are reported but never
    /// abort siblings
    async fn join_pending(
        &self,
        pending: Vec<(String, JoinHandle<Result<()>>)>,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let (names, handles): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let joined = futures::future::join_all(handles);

        let results = match self.dispatch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, joined).await.map_err(|_| {
                DispatchError::Timeout(format!(
                    "Handlers did not complete within {:?}",
                    timeout
                ))
            })?,
            None => joined.await,
        };

        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report(&DispatchError::Handler {
                    name,
                    reason: e.to_string(),
                }),
                Err(join_error) => self.report(&DispatchError::Handler {
                    name,
                    reason: format!("handler task failed: {}", join_error),
                }),
            }
        }

        Ok(())
    }

    async fn handle_confirmation(&self, data: Option<ConfirmationData>) {
        let data = match data {
            Some(data) => data,
            None => {
                tracing::warn!("CONFIRMATION message without confirmationData");
                return;
            }
        };

        match self.http.get(&data.confirmation_url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(app_id = ?data.app_id, "App registration confirmed");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    "Confirmation endpoint returned an error"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reach confirmation endpoint");
            }
        }
    }

    fn report(&self, error: &DispatchError) {
        tracing::error!(error = %error, "Dispatch failure");
        if let Some(callback) = &self.error_callback {
            callback(error);
        }
    }
}

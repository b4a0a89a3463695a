//! Handler registry — mapping from event-derived keys to callbacks
//!
//! Three independent string-keyed namespaces (subscribed events,
//! scheduled events, device commands) plus single slots for the
//! catch-all commands handler, the default command handler, the
//! uninstalled handler, and the fixed-name mode / security-arm-state
//! handlers. The registry is populated at configuration time and
//! read-only during dispatch.

use crate::context::InstalledAppContext;
use crate::error::Result;
use crate::types::{
    DeviceCommand, DeviceCommandsEvent, DeviceEvent, InstalledAppLifecycleEvent, ModeEvent,
    SecurityArmStateEvent, TimerEvent,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed registration name for mode-change events.
///
/// The wire payload carries no subscription name for mode events, so
/// dispatch always resolves this name.
pub const MODE_CHANGE_HANDLER: &str = "modeChangeHandler";

/// Fixed registration name for security arm-state events.
pub const SECURITY_ARM_STATE_HANDLER: &str = "securityArmStateHandler";

/// Future returned by every async handler
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

pub type DeviceEventHandler =
    Arc<dyn Fn(Arc<InstalledAppContext>, DeviceEvent) -> HandlerFuture + Send + Sync>;

pub type TimerEventHandler =
    Arc<dyn Fn(Arc<InstalledAppContext>, TimerEvent) -> HandlerFuture + Send + Sync>;

pub type DeviceCommandHandler = Arc<
    dyn Fn(Arc<InstalledAppContext>, DeviceCommandsEvent, DeviceCommand) -> HandlerFuture
        + Send
        + Sync,
>;

pub type DeviceCommandsHandler =
    Arc<dyn Fn(Arc<InstalledAppContext>, DeviceCommandsEvent) -> HandlerFuture + Send + Sync>;

pub type ModeEventHandler =
    Arc<dyn Fn(Arc<InstalledAppContext>, ModeEvent) -> HandlerFuture + Send + Sync>;

pub type SecurityArmStateHandler =
    Arc<dyn Fn(Arc<InstalledAppContext>, SecurityArmStateEvent) -> HandlerFuture + Send + Sync>;

pub type UninstalledHandler = Arc<
    dyn Fn(Arc<InstalledAppContext>, InstalledAppLifecycleEvent) -> HandlerFuture + Send + Sync,
>;

/// Synchronous fallback for commands nothing else matched
pub type DefaultCommandHandler =
    Arc<dyn Fn(&DeviceCommandsEvent, &DeviceCommand) + Send + Sync>;

/// Derive the handler key for a device event: the subscription name
/// up to the first `_`
pub fn subscription_key(subscription_name: &str) -> &str {
    subscription_name
        .split('_')
        .next()
        .unwrap_or(subscription_name)
}

/// Registration keys tried for a device command, most specific first
pub fn command_keys(command: &DeviceCommand) -> [String; 2] {
    [
        format!(
            "{}/{}/{}",
            command.component_id, command.capability, command.command
        ),
        format!("{}/{}", command.capability, command.command),
    ]
}

/// Registration table consulted during dispatch
#[derive(Default)]
pub struct HandlerRegistry {
    subscribed: HashMap<String, DeviceEventHandler>,
    scheduled: HashMap<String, TimerEventHandler>,
    commands: HashMap<String, DeviceCommandHandler>,
    commands_catch_all: Option<DeviceCommandsHandler>,
    default_command: Option<DefaultCommandHandler>,
    uninstalled: Option<UninstalledHandler>,
    mode_change: Option<ModeEventHandler>,
    security_arm_state: Option<SecurityArmStateHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_subscribed(&mut self, name: impl Into<String>, handler: DeviceEventHandler) {
        self.subscribed.insert(name.into(), handler);
    }

    pub fn register_scheduled(&mut self, name: impl Into<String>, handler: TimerEventHandler) {
        self.scheduled.insert(name.into(), handler);
    }

    /// Register under `componentId/capability/command` or the
    /// component-agnostic `capability/command` form
    pub fn register_command(&mut self, key: impl Into<String>, handler: DeviceCommandHandler) {
        self.commands.insert(key.into(), handler);
    }

    pub fn register_commands_catch_all(&mut self, handler: DeviceCommandsHandler) {
        self.commands_catch_all = Some(handler);
    }

    pub fn register_default_command(&mut self, handler: DefaultCommandHandler) {
        self.default_command = Some(handler);
    }

    pub fn register_uninstalled(&mut self, handler: UninstalledHandler) {
        self.uninstalled = Some(handler);
    }

    pub fn register_mode_change(&mut self, handler: ModeEventHandler) {
        self.mode_change = Some(handler);
    }

    pub fn register_security_arm_state(&mut self, handler: SecurityArmStateHandler) {
        self.security_arm_state = Some(handler);
    }

    pub fn subscribed(&self, key: &str) -> Option<&DeviceEventHandler> {
        self.subscribed.get(key)
    }

    pub fn scheduled(&self, key: &str) -> Option<&TimerEventHandler> {
        self.scheduled.get(key)
    }

    /// Look up a command handler, falling back from the
    /// component-qualified key to `capability/command`
    pub fn command(&self, command: &DeviceCommand) -> Option<&DeviceCommandHandler> {
        let [qualified, fallback] = command_keys(command);
        self.commands
            .get(&qualified)
            .or_else(|| self.commands.get(&fallback))
    }

    pub fn commands_catch_all(&self) -> Option<&DeviceCommandsHandler> {
        self.commands_catch_all.as_ref()
    }

    pub fn default_command(&self) -> Option<&DefaultCommandHandler> {
        self.default_command.as_ref()
    }

    pub fn uninstalled(&self) -> Option<&UninstalledHandler> {
        self.uninstalled.as_ref()
    }

    pub fn mode_change(&self) -> Option<&ModeEventHandler> {
        self.mode_change.as_ref()
    }

    pub fn security_arm_state(&self) -> Option<&SecurityArmStateHandler> {
        self.security_arm_state.as_ref()
    }
}

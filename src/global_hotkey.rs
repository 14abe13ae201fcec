//! Global hotkeys for pausing and emergency-stopping a session.
//!
//! Hotkey presses arrive on a process-wide channel owned by `global-hotkey`.
//! A blocking listener thread maps each press to a [`HotkeyAction`] and
//! forwards it to tokio, where the caller routes it to the engine.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{CadenceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotkeyAction {
    TogglePause,
    EmergencyStop,
}

pub struct HotkeyManager {
    manager: GlobalHotKeyManager,
    bindings: HashMap<u32, HotkeyAction>,
    registered: Vec<HotKey>,
}

impl HotkeyManager {
    pub fn new() -> Result<Self> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| CadenceError::hotkey(format!("failed to create hotkey manager: {e}")))?;

        Ok(Self {
            manager,
            bindings: HashMap::new(),
            registered: Vec::new(),
        })
    }

    pub fn register(&mut self, hotkey_str: &str, action: HotkeyAction) -> Result<()> {
        let hotkey = parse_hotkey(hotkey_str)?;
        if self.bindings.contains_key(&hotkey.id()) {
            return Err(CadenceError::hotkey(format!(
                "hotkey '{hotkey_str}' is already bound"
            )));
        }

        self.manager
            .register(hotkey)
            .map_err(|e| CadenceError::hotkey(format!("failed to register '{hotkey_str}': {e}")))?;

        self.bindings.insert(hotkey.id(), action);
        self.registered.push(hotkey);
        info!(hotkey = hotkey_str, ?action, "global hotkey registered");
        Ok(())
    }

    /// Spawns the listener thread and returns the stream of pressed actions.
    ///
    /// The thread exits once the returned receiver is dropped.
    pub fn start_listener(&self) -> mpsc::UnboundedReceiver<HotkeyAction> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bindings = self.bindings.clone();
        let receiver = GlobalHotKeyEvent::receiver();

        tokio::task::spawn_blocking(move || loop {
            if tx.is_closed() {
                debug!("hotkey listener stopped");
                break;
            }

            if let Ok(event) = receiver.try_recv() {
                if event.state != HotKeyState::Pressed {
                    continue;
                }
                match bindings.get(&event.id) {
                    Some(action) => {
                        if tx.send(*action).is_err() {
                            break;
                        }
                    }
                    None => debug!(id = event.id, "press for unbound hotkey"),
                }
            }

            std::thread::sleep(Duration::from_millis(10));
        });

        rx
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        if let Err(e) = self.manager.unregister_all(&self.registered) {
            warn!(error = %e, "failed to unregister hotkeys");
        }
    }
}

/// Parses strings such as `"ctrl+alt+p"` or `"shift+F5"`.
pub fn parse_hotkey(hotkey_str: &str) -> Result<HotKey> {
    let trimmed = hotkey_str.trim();
    if trimmed.is_empty() {
        return Err(CadenceError::hotkey("empty hotkey string"));
    }
    HotKey::from_str(trimmed)
        .map_err(|e| CadenceError::hotkey(format!("invalid hotkey '{hotkey_str}': {e}")))
}

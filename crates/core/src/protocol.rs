//! Plugin Protocol
//!
//! Message schema exchanged between the editor host and plugin processes.
//!
//! Every message is a JSON object with a `type` discriminator and a
//! `payload`. Messages sent by the host carry a numeric `id` that plugins echo
//! back in their `plugin-response`, which is how replies are correlated with
//! the request that caused them.
//!
//! ```json
//! { "type": "execute-plugin", "id": 7, "payload": { "content": "hello" } }
//! { "type": "plugin-response", "id": 7, "payload": { "success": true, "message": "ok" } }
//! ```
//!
//! Older plugins send `register-plugin` with the plugin fields flattened at
//! the top level instead of nested under `payload`; both shapes are accepted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

// ============================================================================
// Payload Types
// ============================================================================

/// Identity and metadata a plugin announces about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    /// Plugin name, possibly carrying a `-MAJOR.MINOR.PATCH` suffix
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Whether a package directory exists for this plugin
    #[serde(default)]
    pub installed: bool,
}

impl PluginInfo {
    /// Create a minimal info record with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: String::new(),
            author: String::new(),
            installed: false,
        }
    }

    /// The logical identity of this plugin.
    pub fn key(&self) -> String {
        crate::naming::normalize_plugin_name(&self.name)
    }
}

/// A menu entry contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    /// Globally unique item id
    pub id: String,
    pub label: String,
    /// Menu this item is attached to, e.g. "Tools" (matched case-insensitively)
    pub parent_menu: String,
    /// Ordering key; items without one sort as [`MenuItem::DEFAULT_POSITION`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    /// Owning plugin (normalized name)
    #[serde(default)]
    pub plugin_id: String,
}

impl MenuItem {
    /// Position used for ordering when an item does not declare one.
    pub const DEFAULT_POSITION: i32 = 100;

    pub fn effective_position(&self) -> i32 {
        self.position.unwrap_or(Self::DEFAULT_POSITION)
    }
}

/// Payload of `register-menu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMenuPayload {
    pub plugin_name: String,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
}

/// Payload of `execute-plugin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePayload {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Payload of `execute-menu-action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuActionPayload {
    pub menu_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Structured result returned by a plugin, and by the host for plugin-facing
/// replies. Failures are always expressed through `success: false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PluginResponse {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Every message the protocol knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum PluginMessage {
    /// plugin -> host: handshake
    RegisterPlugin(PluginInfo),
    /// plugin -> host: full replacement of the plugin's menu contributions
    RegisterMenu(RegisterMenuPayload),
    /// host -> plugin: run the plugin on some editor content
    ExecutePlugin(ExecutePayload),
    /// plugin -> host: a contributed menu item was invoked
    ExecuteMenuAction(MenuActionPayload),
    /// plugin -> host: reply to a host request, correlated by id
    PluginResponse(PluginResponse),
}

impl PluginMessage {
    /// The wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginMessage::RegisterPlugin(_) => "register-plugin",
            PluginMessage::RegisterMenu(_) => "register-menu",
            PluginMessage::ExecutePlugin(_) => "execute-plugin",
            PluginMessage::ExecuteMenuAction(_) => "execute-menu-action",
            PluginMessage::PluginResponse(_) => "plugin-response",
        }
    }
}

/// A message together with its optional correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: Option<u64>,
    pub message: PluginMessage,
}

impl Envelope {
    pub fn new(message: PluginMessage) -> Self {
        Self { id: None, message }
    }

    pub fn with_id(id: u64, message: PluginMessage) -> Self {
        Self {
            id: Some(id),
            message,
        }
    }

    /// Encode as a JSON object `{ type, payload, id? }`.
    pub fn to_value(&self) -> CoreResult<Value> {
        let mut value = serde_json::to_value(&self.message)?;
        if let (Some(id), Some(obj)) = (self.id, value.as_object_mut()) {
            obj.insert("id".to_string(), Value::from(id));
        }
        Ok(value)
    }

    /// Encode as the bytes of a single socket write.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_value()?)?)
    }

    /// Decode a JSON document received from the wire.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(CoreError::protocol("message must be a JSON object"));
        };

        let id = obj.remove("id").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

        let kind = match obj.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(CoreError::protocol("message has no 'type' field")),
        };

        let payload = match obj.remove("payload") {
            Some(payload) => payload,
            // Legacy register-plugin: fields live next to `type`
            None if kind == "register-plugin" => Value::Object(obj),
            None => Value::Null,
        };

        let mut normalized = Map::new();
        normalized.insert("type".to_string(), Value::String(kind.clone()));
        if !payload.is_null() {
            normalized.insert("payload".to_string(), payload);
        }

        let message = serde_json::from_value(Value::Object(normalized))
            .map_err(|e| CoreError::protocol(format!("invalid '{}' message: {}", kind, e)))?;

        Ok(Self { id, message })
    }

    /// Decode from raw bytes holding exactly one JSON document.
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| CoreError::parse(e.to_string()))?;
        Self::from_value(value)
    }
}

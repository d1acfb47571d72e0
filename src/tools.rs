//! Tool registry: the closed set of callable game capabilities and the
//! dispatch loop that answers a model's tool-call batch.
//!
//! The model only knows tools by string name. Names are validated against
//! [`ToolName`] when a callback is registered, so an unknown name can only
//! reach [`ToolRegistry::dispatch`] from the remote side, where it gets the
//! fixed "tool not implemented" result.

use crate::error::{RegistryError, ToolError};
use crate::protocol::{FunctionCall, FunctionDeclaration, FunctionResponse, ToolResult};
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;

pub const NOT_IMPLEMENTED: &str = "tool not implemented";

/// Game-side tool callback. Receives the call's arguments object.
pub type ToolCallback = Box<dyn Fn(&Value) -> Result<ToolResult, ToolError>>;

// ---------------------------------------------------------------------------
// Tool names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetSceneSnapshot,
    GetObjectInfo,
    GetPlayerPosition,
    ListSceneObjects,
    ChangeObjectColor,
    RotateObject,
    MovePlayer,
    InspectObject,
    UnlockClue,
    PickupObject,
    LightCampfire,
    CheckInventory,
    /// Handled by the session itself, never dispatched to a callback.
    UpdateDetectiveThoughts,
}

impl ToolName {
    pub const ALL: [ToolName; 13] = [
        ToolName::GetSceneSnapshot,
        ToolName::GetObjectInfo,
        ToolName::GetPlayerPosition,
        ToolName::ListSceneObjects,
        ToolName::ChangeObjectColor,
        ToolName::RotateObject,
        ToolName::MovePlayer,
        ToolName::InspectObject,
        ToolName::UnlockClue,
        ToolName::PickupObject,
        ToolName::LightCampfire,
        ToolName::CheckInventory,
        ToolName::UpdateDetectiveThoughts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetSceneSnapshot => "getSceneSnapshot",
            ToolName::GetObjectInfo => "getObjectInfo",
            ToolName::GetPlayerPosition => "getPlayerPosition",
            ToolName::ListSceneObjects => "listSceneObjects",
            ToolName::ChangeObjectColor => "changeObjectColor",
            ToolName::RotateObject => "rotateObject",
            ToolName::MovePlayer => "movePlayer",
            ToolName::InspectObject => "inspectObject",
            ToolName::UnlockClue => "unlockClue",
            ToolName::PickupObject => "pickupObject",
            ToolName::LightCampfire => "lightCampfire",
            ToolName::CheckInventory => "checkInventory",
            ToolName::UpdateDetectiveThoughts => "updateDetectiveThoughts",
        }
    }

    /// True for tools the session answers locally.
    pub fn is_local(self) -> bool {
        self == ToolName::UpdateDetectiveThoughts
    }

    pub fn declaration(self) -> FunctionDeclaration {
        let (description, parameters) = match self {
            ToolName::GetSceneSnapshot => (
                "Get a JSON snapshot of every named object in the room with world transforms.",
                None,
            ),
            ToolName::GetObjectInfo => (
                "Get position, rotation, scale and color of one object.",
                Some(object_schema(&[])),
            ),
            ToolName::GetPlayerPosition => ("Get the player's current world position.", None),
            ToolName::ListSceneObjects => (
                "List the named objects in the room with their type and position.",
                None,
            ),
            ToolName::ChangeObjectColor => (
                "Change the color of an object. Accepts a color name or a #rrggbb value.",
                Some(object_schema(&[("color", string_prop("Color name or hex value"))])),
            ),
            ToolName::RotateObject => (
                "Rotate an object: flip it upside down, spin it around, or reset its rotation.",
                Some(object_schema(&[(
                    "action",
                    enum_prop("Rotation to apply", &["flip", "spin", "reset"]),
                )])),
            ),
            ToolName::MovePlayer => (
                "Walk the player toward an object label or an 'x,y,z' coordinate.",
                Some(schema(
                    &[("target", string_prop("Object label or coordinates"))],
                    &["target"],
                )),
            ),
            ToolName::InspectObject => (
                "Look closely at an object and describe what the detective notices.",
                Some(object_schema(&[])),
            ),
            ToolName::UnlockClue => (
                "Reveal a clue to the player once they have earned it.",
                Some(schema(
                    &[
                        ("clueId", string_prop("Stable clue identifier")),
                        ("clueText", string_prop("Clue shown to the player")),
                    ],
                    &["clueId", "clueText"],
                )),
            ),
            ToolName::PickupObject => (
                "Pick up a nearby object. If the player is too far away they walk closer and the call must be retried.",
                Some(object_schema(&[])),
            ),
            ToolName::LightCampfire => (
                "Light the campfire with a match from the inventory. The player must be close to it.",
                None,
            ),
            ToolName::CheckInventory => ("List the items the player is carrying.", None),
            ToolName::UpdateDetectiveThoughts => (
                "Share the detective's current line of reasoning with the player.",
                Some(schema(
                    &[
                        ("thought", string_prop("The current deduction")),
                        (
                            "priority",
                            enum_prop("How urgent the thought is", &["low", "medium", "high", "critical"]),
                        ),
                    ],
                    &["thought", "priority"],
                )),
            ),
        };

        FunctionDeclaration {
            name: self.as_str().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

impl FromStr for ToolName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownTool(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarations for every tool, in declaration order.
pub fn declarations() -> Vec<FunctionDeclaration> {
    ToolName::ALL.into_iter().map(ToolName::declaration).collect()
}

fn string_prop(description: &str) -> Value {
    json!({ "type": "STRING", "description": description })
}

fn enum_prop(description: &str, values: &[&str]) -> Value {
    json!({ "type": "STRING", "description": description, "enum": values })
}

fn schema(props: &[(&str, Value)], required: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = props
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    json!({ "type": "OBJECT", "properties": properties, "required": required })
}

/// Schema with a required `objectName` plus the given extra required props.
fn object_schema(extra: &[(&str, Value)]) -> Value {
    let mut props = vec![("objectName", string_prop("Label of the object in the room"))];
    props.extend(extra.iter().map(|(k, v)| (*k, v.clone())));
    let required: Vec<&str> = props.iter().map(|(k, _)| *k).collect();
    schema(&props, &required)
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// Required string argument.
pub fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string argument '{}'", key)))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolName, ToolCallback>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().map(|t| t.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register by wire name. Names outside the declared set are rejected.
    pub fn register_tool<F>(&mut self, name: &str, callback: F) -> Result<(), RegistryError>
    where
        F: Fn(&Value) -> Result<ToolResult, ToolError> + 'static,
    {
        let tool = name.parse::<ToolName>()?;
        self.register(tool, callback);
        Ok(())
    }

    /// Register a callback, replacing any previous one for the same tool.
    pub fn register<F>(&mut self, tool: ToolName, callback: F)
    where
        F: Fn(&Value) -> Result<ToolResult, ToolError> + 'static,
    {
        if tool.is_local() {
            warn!("Tool {} is answered by the session; callback will not be used", tool);
        }
        self.tools.insert(tool, Box::new(callback));
    }

    /// Returns true if a callback was removed.
    pub fn unregister_tool(&mut self, name: &str) -> bool {
        match name.parse::<ToolName>() {
            Ok(tool) => self.tools.remove(&tool).is_some(),
            Err(_) => false,
        }
    }

    pub fn contains(&self, tool: ToolName) -> bool {
        self.tools.contains_key(&tool)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call. Never panics: unknown names, callback errors and
    /// callback panics all become failure results.
    pub fn call(&self, name: &str, args: &Value) -> ToolResult {
        let Some(callback) = name.parse::<ToolName>().ok().and_then(|t| self.tools.get(&t)) else {
            warn!("Model called unregistered tool '{}'", name);
            return ToolResult::error(NOT_IMPLEMENTED, format!("{} is not available", name));
        };

        let empty = Value::Object(Default::default());
        let args = if args.is_null() { &empty } else { args };

        match catch_unwind(AssertUnwindSafe(|| callback(args))) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Tool {} failed: {}", name, e);
                ToolResult::error(e.to_string(), format!("{} failed", name))
            }
            Err(_) => {
                warn!("Tool {} panicked", name);
                ToolResult::error("tool panicked", format!("{} failed unexpectedly", name))
            }
        }
    }

    /// Answer a call batch, one response per call, in call order.
    ///
    /// `local` gets first refusal on each call; calls it answers never reach
    /// a registered callback.
    pub fn dispatch(
        &self,
        calls: &[FunctionCall],
        mut local: impl FnMut(&FunctionCall) -> Option<ToolResult>,
    ) -> Vec<FunctionResponse> {
        calls
            .iter()
            .map(|call| {
                let response = local(call).unwrap_or_else(|| self.call(&call.name, &call.args));
                debug!(
                    "Tool {} ({}) → success={}",
                    call.name, call.id, response.success
                );
                FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

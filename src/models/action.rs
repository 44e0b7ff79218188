use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::agent::NotificationChannel;

/// A unit of work within an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub struct AgentAction {
    pub id: String,
    pub name: String,
    pub params: ActionParams,
    pub order: u32,
    /// Seconds; falls back to the engine default when unset.
    pub timeout: Option<u64>,
    pub retry_count: Option<u32>,
    pub depends_on: Vec<String>,
}

impl AgentAction {
    pub fn kind(&self) -> ActionKind {
        self.params.kind()
    }

    pub fn retries(&self) -> u32 {
        self.retry_count.unwrap_or(0)
    }
}

/// Action `type` discriminant. Unrecognised types map to `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Capture,
    Focus,
    PlateSolve,
    Process,
    Script,
    Command,
    Notification,
    Other(String),
}

impl ActionKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "capture" => Self::Capture,
            "focus" => Self::Focus,
            "platesolve" => Self::PlateSolve,
            "process" => Self::Process,
            "script" => Self::Script,
            "command" => Self::Command,
            "notification" => Self::Notification,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Capture => "capture",
            Self::Focus => "focus",
            Self::PlateSolve => "platesolve",
            Self::Process => "process",
            Self::Script => "script",
            Self::Command => "command",
            Self::Notification => "notification",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of an action, typed by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionParams {
    Capture(CaptureParams),
    Focus(FocusParams),
    PlateSolve(PlateSolveParams),
    Process(ProcessParams),
    Script(ScriptParams),
    Command(CommandParams),
    Notification(NotificationParams),
    /// Forward-compatible fallback for action types this build does not know.
    Other { kind: String, parameters: Map<String, Value> },
}

impl ActionParams {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Capture(_) => ActionKind::Capture,
            Self::Focus(_) => ActionKind::Focus,
            Self::PlateSolve(_) => ActionKind::PlateSolve,
            Self::Process(_) => ActionKind::Process,
            Self::Script(_) => ActionKind::Script,
            Self::Command(_) => ActionKind::Command,
            Self::Notification(_) => ActionKind::Notification,
            Self::Other { kind, .. } => ActionKind::Other(kind.clone()),
        }
    }

    /// Decode the wire pair (`type`, `parameters`).
    pub fn from_parts(kind: &str, parameters: Map<String, Value>) -> Result<Self, String> {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: &str,
            parameters: Map<String, Value>,
        ) -> Result<T, String> {
            serde_json::from_value(Value::Object(parameters))
                .map_err(|e| format!("invalid parameters for {} action: {}", kind, e))
        }

        Ok(match ActionKind::parse(kind) {
            ActionKind::Capture => Self::Capture(decode(kind, parameters)?),
            ActionKind::Focus => Self::Focus(decode(kind, parameters)?),
            ActionKind::PlateSolve => Self::PlateSolve(decode(kind, parameters)?),
            ActionKind::Process => Self::Process(decode(kind, parameters)?),
            ActionKind::Script => Self::Script(decode(kind, parameters)?),
            ActionKind::Command => Self::Command(decode(kind, parameters)?),
            ActionKind::Notification => Self::Notification(decode(kind, parameters)?),
            ActionKind::Other(kind) => Self::Other { kind, parameters },
        })
    }

    /// Flatten back into a key/value mapping, as stored and as used by command templates.
    pub fn to_map(&self) -> Map<String, Value> {
        fn encode<T: Serialize>(params: &T) -> Map<String, Value> {
            match serde_json::to_value(params) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            }
        }

        match self {
            Self::Capture(p) => encode(p),
            Self::Focus(p) => encode(p),
            Self::PlateSolve(p) => encode(p),
            Self::Process(p) => encode(p),
            Self::Script(p) => encode(p),
            Self::Command(p) => encode(p),
            Self::Notification(p) => encode(p),
            Self::Other { parameters, .. } => parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureParams {
    /// Exposure length in seconds.
    pub exposure: f64,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binning: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateSolveParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ra: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dec: Option<f64>,
    /// Search radius in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default)]
    pub sync_mount: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParams {
    /// Path to the script file.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParams {
    /// Shell command line, run through `sh -c`.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationParams {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<NotificationChannel>,
}

/// Wire shape of an action: flat `type` + free-form `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
}

impl TryFrom<RawAction> for AgentAction {
    type Error = String;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let params = ActionParams::from_parts(&raw.kind, raw.parameters)
            .map_err(|e| format!("action '{}': {}", raw.id, e))?;
        Ok(Self {
            id: raw.id,
            name: raw.name,
            params,
            order: raw.order,
            timeout: raw.timeout,
            retry_count: raw.retry_count,
            depends_on: raw.depends_on,
        })
    }
}

impl From<AgentAction> for RawAction {
    fn from(action: AgentAction) -> Self {
        Self {
            kind: action.kind().as_str().to_string(),
            parameters: action.params.to_map(),
            id: action.id,
            name: action.name,
            order: action.order,
            timeout: action.timeout,
            retry_count: action.retry_count,
            depends_on: action.depends_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_action_decodes_typed_params() {
        let action: AgentAction = serde_json::from_value(json!({
            "id": "lights",
            "type": "capture",
            "name": "Capture lights",
            "parameters": { "exposure": 120, "count": 30, "filter": "Ha" },
            "order": 2,
            "timeout": 7200,
            "retryCount": 1,
            "dependsOn": ["focus"]
        })).unwrap();

        assert_eq!(action.kind(), ActionKind::Capture);
        assert_eq!(action.depends_on, vec!["focus"]);
        assert_eq!(action.retries(), 1);
        match &action.params {
            ActionParams::Capture(p) => {
                assert_eq!(p.exposure, 120.0);
                assert_eq!(p.count, 30);
                assert_eq!(p.filter.as_deref(), Some("Ha"));
            }
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_kept_as_other() {
        let action: AgentAction = serde_json::from_value(json!({
            "id": "dome",
            "type": "domeControl",
            "name": "Open dome",
            "parameters": { "shutter": "open" }
        })).unwrap();

        assert_eq!(action.kind(), ActionKind::Other("domeControl".into()));
        let back = serde_json::to_value(&action).unwrap();
        assert_eq!(back["type"], "domeControl");
        assert_eq!(back["parameters"]["shutter"], "open");
    }

    #[test]
    fn test_invalid_typed_params_rejected() {
        let result: Result<AgentAction, _> = serde_json::from_value(json!({
            "id": "cmd",
            "type": "command",
            "name": "No command line",
            "parameters": {}
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("cmd"), "{}", err);
    }

    #[test]
    fn test_serialization_uses_stable_field_names() {
        let action: AgentAction = serde_json::from_value(json!({
            "id": "solve",
            "type": "platesolve",
            "name": "Solve",
            "parameters": { "syncMount": true },
            "retryCount": 2
        })).unwrap();
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "platesolve");
        assert_eq!(value["retryCount"], 2);
        assert_eq!(value["parameters"]["syncMount"], true);
        assert!(value.get("dependsOn").is_none());
    }
}

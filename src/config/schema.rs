use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "scheduler": {
                "type": "object",
                "properties": {
                    "poll_interval_secs": { "type": "integer", "minimum": 1 },
                    "tolerance_secs": { "type": "integer", "minimum": 0 },
                    "utc_offset_minutes": { "type": "integer", "minimum": -1439, "maximum": 1439 },
                    "max_concurrent_runs": { "type": "integer", "minimum": 1 }
                }
            },
            "engine": {
                "type": "object",
                "properties": {
                    "default_timeout_secs": { "type": "integer", "minimum": 1 },
                    "backoff_base_ms": { "type": "integer", "minimum": 0 },
                    "backoff_max_ms": { "type": "integer", "minimum": 0 },
                    "cancel_grace_secs": { "type": "integer", "minimum": 0 }
                }
            },
            "storage": {
                "type": "object",
                "properties": { "database": { "type": "string" } }
            },
            "agents": {
                "type": "object",
                "properties": { "directory": { "type": "string" } }
            },
            "facts": {
                "type": "object",
                "properties": { "file": { "type": "string" } }
            },
            "notifications": {
                "type": "object",
                "properties": { "webhook_url": { "type": "string", "format": "uri" } }
            },
            "handlers": {
                "type": "object",
                "additionalProperties": { "type": "string", "minLength": 1 }
            }
        }
    })
});

/// Shape of one agent definition file.
pub static AGENT_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["id", "name"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string", "minLength": 1 },
            "description": { "type": "string" },
            "type": { "type": "string", "enum": ["observation", "imaging", "processing", "analysis", "custom"] },
            "config": {
                "type": "object",
                "properties": {
                    "schedule": {
                        "type": "object",
                        "required": ["type"],
                        "properties": {
                            "type": { "type": "string", "enum": ["once", "daily", "weekly", "monthly", "custom"] },
                            "date": { "type": "string" },
                            "time": { "type": "string", "pattern": "^[0-9]{2}:[0-9]{2}(:[0-9]{2})?$" },
                            "days": { "type": "array", "items": { "type": "integer" } },
                            "expression": { "type": "string" }
                        }
                    },
                    "triggers": {
                        "type": "object",
                        "properties": {
                            "onEquipmentConnect": { "type": "boolean" },
                            "onSunset": { "type": "boolean" },
                            "onWeatherClear": { "type": "boolean" },
                            "onCustomCondition": { "type": "string" }
                        }
                    },
                    "actions": { "type": "array", "items": { "$ref": "#/$defs/action" } },
                    "conditions": { "type": "array", "items": { "$ref": "#/$defs/condition" } },
                    "notifications": {
                        "type": "object",
                        "properties": {
                            "onStart": { "type": "boolean" },
                            "onComplete": { "type": "boolean" },
                            "onError": { "type": "boolean" },
                            "channels": {
                                "type": "array",
                                "items": { "type": "string", "enum": ["email", "push", "sms"] }
                            }
                        }
                    }
                }
            }
        },
        "$defs": {
            "action": {
                "type": "object",
                "required": ["id", "type", "name"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "type": { "type": "string", "minLength": 1 },
                    "name": { "type": "string" },
                    "parameters": { "type": "object" },
                    "dependsOn": { "type": "array", "items": { "type": "string" } },
                    "timeout": { "type": "integer", "minimum": 1 },
                    "retryCount": { "type": "integer", "minimum": 0 }
                }
            },
            "condition": {
                "type": "object",
                "required": ["type", "parameter", "operator", "value"],
                "properties": {
                    "type": { "type": "string", "enum": ["weather", "time", "equipment", "custom"] },
                    "parameter": { "type": "string", "minLength": 1 },
                    "operator": {
                        "type": "string",
                        "enum": ["equals", "notEquals", "greaterThan", "lessThan", "contains", "notContains"]
                    }
                }
            }
        }
    })
});

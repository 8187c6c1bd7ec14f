use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

/// A tool definition in the universal shape used internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// A tool invocation decided by a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolSpec {
    /// Render in OpenAI function-call format (also used by Groq, Together, vLLM).
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// Render in Anthropic format. Anthropic uses `input_schema` instead of
    /// `parameters`.
    pub fn to_anthropic_format(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// Normalize a wire-format tool list to the universal shape.
///
/// Accepted inputs:
/// - Universal: `{"name", "description", "parameters"}`
/// - OpenAI: `{"type":"function", "function":{"name", "description",
///   "parameters"|"input_schema"}}`
/// - Anthropic: `{"name", "description", "input_schema"}`
///
/// Unknown shapes without a `name` are dropped with a warning.
pub fn normalize_tools(tools: &[Value]) -> Vec<ToolSpec> {
    let mut normalized = Vec::with_capacity(tools.len());

    for tool in tools {
        let obj = match tool.as_object() {
            Some(o) => o,
            None => {
                warn!(?tool, "skipping non-object tool schema");
                continue;
            }
        };

        // Universal format passes through.
        if obj.contains_key("name") && obj.contains_key("parameters") {
            normalized.push(ToolSpec {
                name: obj["name"].as_str().unwrap_or_default().to_string(),
                description: obj
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                parameters: obj["parameters"].clone(),
            });
            continue;
        }

        // OpenAI function wrapper.
        if obj.get("type").and_then(|v| v.as_str()) == Some("function") {
            if let Some(func) = obj.get("function").and_then(|v| v.as_object()) {
                let name = func
                    .get("name")
                    .or_else(|| obj.get("name"))
                    .and_then(|v| v.as_str());
                match name {
                    Some(name) => {
                        normalized.push(ToolSpec {
                            name: name.to_string(),
                            description: func
                                .get("description")
                                .or_else(|| obj.get("description"))
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            parameters: func
                                .get("parameters")
                                .or_else(|| func.get("input_schema"))
                                .cloned()
                                .unwrap_or_else(|| json!({})),
                        });
                        continue;
                    }
                    None => {
                        warn!(?tool, "skipping OpenAI-format tool without a name");
                        continue;
                    }
                }
            }
        }

        // Anthropic input_schema shape.
        if obj.contains_key("input_schema") {
            match obj.get("name").and_then(|v| v.as_str()) {
                Some(name) => {
                    normalized.push(ToolSpec {
                        name: name.to_string(),
                        description: obj
                            .get("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        parameters: obj
                            .get("input_schema")
                            .cloned()
                            .unwrap_or_else(|| json!({})),
                    });
                    continue;
                }
                None => {
                    warn!(?tool, "skipping Anthropic-format tool without a name");
                    continue;
                }
            }
        }

        // Unrecognized shape: keep only when it at least carries a name.
        match obj.get("name").and_then(|v| v.as_str()) {
            Some(name) => {
                warn!(name, "unrecognized tool schema format, keeping as-is");
                normalized.push(ToolSpec {
                    name: name.to_string(),
                    description: obj
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    parameters: json!({}),
                });
            }
            None => warn!(?tool, "dropping tool schema without a name"),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_format_passes_through() {
        let tools = vec![json!({
            "name": "get_weather",
            "description": "Weather lookup",
            "parameters": {"type": "object"},
        })];
        let normalized = normalize_tools(&tools);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].name, "get_weather");
        assert_eq!(normalized[0].parameters, json!({"type": "object"}));
    }

    #[test]
    fn openai_format_is_unwrapped() {
        let tools = vec![json!({
            "type": "function",
            "function": {
                "name": "search",
                "description": "Search things",
                "parameters": {"type": "object", "properties": {}},
            },
        })];
        let normalized = normalize_tools(&tools);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].name, "search");
        assert_eq!(normalized[0].description, "Search things");
    }

    #[test]
    fn openai_input_schema_variant_is_accepted() {
        let tools = vec![json!({
            "type": "function",
            "function": {"name": "f", "input_schema": {"type": "object"}},
        })];
        let normalized = normalize_tools(&tools);
        assert_eq!(normalized[0].parameters, json!({"type": "object"}));
    }

    #[test]
    fn anthropic_format_renames_input_schema() {
        let tools = vec![json!({
            "name": "calc",
            "description": "Calculator",
            "input_schema": {"type": "object"},
        })];
        let normalized = normalize_tools(&tools);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].parameters, json!({"type": "object"}));
    }

    #[test]
    fn nameless_tools_are_dropped() {
        let tools = vec![
            json!({"type": "function", "function": {"description": "no name"}}),
            json!({"totally": "unknown"}),
            json!("not even an object"),
        ];
        assert!(normalize_tools(&tools).is_empty());
    }

    #[test]
    fn provider_renderers() {
        let spec = ToolSpec {
            name: "t".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        };
        assert_eq!(spec.to_openai_format()["function"]["name"], "t");
        assert_eq!(spec.to_anthropic_format()["input_schema"], json!({"type": "object"}));
    }
}

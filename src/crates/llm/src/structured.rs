//! Structured output — extracting a JSON object from a generation.
//!
//! A thin layer over [`generate`] that picks the extraction strategy from
//! the routed provider's [`StructuredOutputMode`]:
//!
//! - `JsonSchemaStrict` — JSON-schema response format, strict.
//! - `JsonSchema` — JSON-schema response format, non-strict.
//! - `ToolCall` — declare a single tool whose parameters ARE the schema,
//!   force it by name with zero tool rounds, and read the object from the
//!   first tool call's arguments.
//!
//! Empty output or a JSON parse failure yields
//! [`LlmError::NoObjectGenerated`].

use crate::client::{Client, StructuredOutputMode};
use crate::error::{LlmError, Result};
use crate::generate::{generate, GenerateOptions, GenerateResult};
use crate::types::{Request, ResponseFormat, Tool, ToolChoice};
use serde_json::Value;

/// Options for a structured-output run.
pub struct ObjectOptions {
    pub base: GenerateOptions,
    /// Name used for the schema / forced tool.
    pub schema_name: String,
    /// JSON-Schema shape of the desired object.
    pub schema: Value,
}

impl ObjectOptions {
    pub fn new(base: GenerateOptions, schema_name: impl Into<String>, schema: Value) -> Self {
        Self {
            base,
            schema_name: schema_name.into(),
            schema,
        }
    }
}

/// Generate a JSON object conforming to the schema.
pub async fn generate_object(
    client: &Client,
    options: ObjectOptions,
) -> Result<(Value, GenerateResult)> {
    let mut probe = Request::new(options.base.model.clone());
    probe.provider = options.base.provider.clone();
    let provider = client.provider_for(&probe)?;
    let provider_name = provider.name().to_string();
    let mode = provider.structured_output_mode();

    let mut base = options.base;
    let result = match mode {
        StructuredOutputMode::JsonSchemaStrict | StructuredOutputMode::JsonSchema => {
            base.response_format = Some(ResponseFormat::JsonSchema {
                name: options.schema_name.clone(),
                schema: options.schema.clone(),
                strict: mode == StructuredOutputMode::JsonSchemaStrict,
            });
            generate(client, base).await?
        }
        StructuredOutputMode::ToolCall => {
            let tool = Tool::new(
                options.schema_name.clone(),
                "Produce the structured output.",
                options.schema.clone(),
            );
            base.tools = vec![tool];
            base.tool_choice = Some(ToolChoice::Named(options.schema_name.clone()));
            base.max_tool_rounds = 0;
            generate(client, base).await?
        }
    };

    let object = extract_object(&provider_name, mode, &result)?;
    Ok((object, result))
}

fn extract_object(
    provider: &str,
    mode: StructuredOutputMode,
    result: &GenerateResult,
) -> Result<Value> {
    match mode {
        StructuredOutputMode::ToolCall => {
            let step = result.steps.last().ok_or_else(|| no_object(provider, "no steps"))?;
            let (_, _, arguments) = step
                .tool_calls
                .first()
                .ok_or_else(|| no_object(provider, "model produced no tool call"))?;
            if arguments.is_null() {
                return Err(no_object(provider, "tool call had null arguments"));
            }
            Ok(arguments.clone())
        }
        _ => {
            let text = result.text.trim();
            if text.is_empty() {
                return Err(no_object(provider, "model produced empty output"));
            }
            serde_json::from_str(text)
                .map_err(|e| no_object(provider, &format!("output is not valid JSON: {e}")))
        }
    }
}

fn no_object(provider: &str, message: &str) -> LlmError {
    LlmError::NoObjectGenerated {
        provider: provider.to_string(),
        message: message.to_string(),
    }
}

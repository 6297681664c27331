//! The agentic `generate` driver — bounded multi-round tool execution.
//!
//! Built on [`Client::complete`]. Each round the driver asks the model for a
//! completion (under a retry policy wrapping only retryable error classes),
//! extracts text and tool calls, and — while rounds remain — executes every
//! requested tool concurrently and feeds the results back. Tool failures
//! are contained: unknown tools, missing executors, and throwing handlers
//! all produce error tool-results, never client errors.

use crate::client::Client;
use crate::error::{LlmError, Result};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::types::{
    FinishReason, Message, Request, Response, Tool, ToolChoice, Usage,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;

/// The outcome of one executed tool call.
#[derive(Debug, Clone)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub tool_name: String,
    pub content: Value,
    pub is_error: bool,
}

/// One round of the generate loop.
#[derive(Debug, Clone)]
pub struct GenerateStep {
    pub text: String,
    pub reasoning: Option<String>,
    /// (call_id, tool_name, arguments) requested this round.
    pub tool_calls: Vec<(String, String, Value)>,
    /// Results of the tools executed after this round.
    pub tool_results: Vec<ToolResultRecord>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Aggregate result of a `generate` run.
#[derive(Debug)]
pub struct GenerateResult {
    /// Final-step assistant text.
    pub text: String,
    /// Final-step reasoning text, when present.
    pub reasoning: Option<String>,
    pub finish_reason: FinishReason,
    /// Final-step usage.
    pub usage: Usage,
    /// Sum of usage across all steps.
    pub total_usage: Usage,
    pub steps: Vec<GenerateStep>,
    /// Final-step response.
    pub response: Response,
}

/// Predicate over the accumulated steps; returning true stops the loop.
pub type StopCondition = Box<dyn Fn(&[GenerateStep]) -> bool + Send + Sync>;

/// Options for a `generate` run. Exactly one of `prompt` or `messages`
/// must be set.
pub struct GenerateOptions {
    pub model: String,
    pub prompt: Option<String>,
    pub messages: Option<Vec<Message>>,
    pub system: Option<String>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    /// Tool-execution rounds allowed; 0 disables execution entirely.
    pub max_tool_rounds: u32,
    pub provider: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub reasoning_effort: Option<String>,
    pub response_format: Option<crate::types::ResponseFormat>,
    pub stop_when: Option<StopCondition>,
    pub retry: RetryConfig,
}

impl GenerateOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: None,
            messages: None,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            max_tool_rounds: 1,
            provider: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            reasoning_effort: None,
            response_format: None,
            stop_when: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_stop_when(mut self, stop: StopCondition) -> Self {
        self.stop_when = Some(stop);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Run the agentic loop to completion.
pub async fn generate(client: &Client, options: GenerateOptions) -> Result<GenerateResult> {
    let mut messages = build_initial_messages(&options)?;
    let tools_by_name: HashMap<String, Tool> = options
        .tools
        .iter()
        .map(|tool| (tool.name.clone(), tool.clone()))
        .collect();
    let any_executor = options.tools.iter().any(|tool| tool.execute.is_some());

    let mut steps: Vec<GenerateStep> = Vec::new();
    let mut total_usage = Usage::default();
    let mut rounds_used = 0u32;

    loop {
        let response = retry_with_backoff(&options.retry, || {
            client.complete(request_for(&options, messages.clone()))
        })
        .await?;
        total_usage.add(&response.usage);

        let text = response.text();
        let reasoning = {
            let reasoning = response.message.reasoning_text();
            if reasoning.is_empty() {
                None
            } else {
                Some(reasoning)
            }
        };
        let tool_calls: Vec<(String, String, Value)> = response
            .tool_calls()
            .into_iter()
            .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
            .collect();

        let mut step = GenerateStep {
            text,
            reasoning,
            tool_calls: tool_calls.clone(),
            tool_results: Vec::new(),
            finish_reason: response.finish_reason,
            usage: response.usage,
        };

        let stop_requested = options
            .stop_when
            .as_ref()
            .map(|stop| {
                let mut window = steps.clone();
                window.push(step.clone());
                stop(&window)
            })
            .unwrap_or(false);

        let should_continue = !options.tools.is_empty()
            && any_executor
            && response.finish_reason == FinishReason::ToolCalls
            && !tool_calls.is_empty()
            && rounds_used < options.max_tool_rounds
            && !stop_requested;

        if !should_continue {
            steps.push(step);
            let last = steps.last().expect("at least one step");
            return Ok(GenerateResult {
                text: last.text.clone(),
                reasoning: last.reasoning.clone(),
                finish_reason: last.finish_reason,
                usage: last.usage,
                total_usage,
                steps,
                response,
            });
        }

        tracing::debug!(round = rounds_used + 1, calls = tool_calls.len(), "executing tool round");
        let results = execute_tool_calls(&tools_by_name, &tool_calls).await;
        step.tool_results = results.clone();
        steps.push(step);
        rounds_used += 1;

        messages.push(response.message.clone());
        for record in results {
            messages.push(Message::tool_result(
                record.call_id,
                record.content,
                record.is_error,
            ));
        }
    }
}

fn build_initial_messages(options: &GenerateOptions) -> Result<Vec<Message>> {
    match (&options.prompt, &options.messages) {
        (Some(_), Some(_)) => Err(LlmError::Config(
            "prompt and messages are mutually exclusive".into(),
        )),
        (None, None) => Err(LlmError::Config(
            "one of prompt or messages is required".into(),
        )),
        (Some(prompt), None) => {
            let mut messages = Vec::new();
            if let Some(system) = &options.system {
                messages.push(Message::system(system.clone()));
            }
            messages.push(Message::user(prompt.clone()));
            Ok(messages)
        }
        (None, Some(given)) => {
            let mut messages = Vec::new();
            if let Some(system) = &options.system {
                messages.push(Message::system(system.clone()));
            }
            messages.extend(given.iter().cloned());
            Ok(messages)
        }
    }
}

fn request_for(options: &GenerateOptions, messages: Vec<Message>) -> Request {
    Request {
        model: options.model.clone(),
        messages,
        tools: options.tools.clone(),
        tool_choice: options.tool_choice.clone(),
        max_tokens: options.max_tokens,
        temperature: options.temperature,
        top_p: options.top_p,
        stop_sequences: Vec::new(),
        reasoning_effort: options.reasoning_effort.clone(),
        response_format: options.response_format.clone(),
        provider: options.provider.clone(),
        provider_options: None,
        metadata: HashMap::new(),
    }
}

/// Execute all tool calls of one round concurrently. Result order follows
/// the originating call order regardless of completion order.
async fn execute_tool_calls(
    tools_by_name: &HashMap<String, Tool>,
    calls: &[(String, String, Value)],
) -> Vec<ToolResultRecord> {
    let futures = calls.iter().map(|(call_id, name, arguments)| {
        let tool = tools_by_name.get(name).cloned();
        let call_id = call_id.clone();
        let name = name.clone();
        let arguments = arguments.clone();
        async move {
            let Some(tool) = tool else {
                return ToolResultRecord {
                    call_id,
                    tool_name: name.clone(),
                    content: json!(format!("unknown tool '{name}'")),
                    is_error: true,
                };
            };
            let Some(executor) = tool.execute.clone() else {
                return ToolResultRecord {
                    call_id,
                    tool_name: name.clone(),
                    content: json!(format!("tool '{name}' has no executor")),
                    is_error: true,
                };
            };
            #[cfg(feature = "json-validation")]
            if let Err(message) = validate_arguments(&tool.parameters, &arguments) {
                return ToolResultRecord {
                    call_id,
                    tool_name: name,
                    content: json!(message),
                    is_error: true,
                };
            }
            match executor.execute(arguments).await {
                Ok(content) => ToolResultRecord {
                    call_id,
                    tool_name: name,
                    content,
                    is_error: false,
                },
                Err(message) => ToolResultRecord {
                    call_id,
                    tool_name: name,
                    content: json!(message),
                    is_error: true,
                },
            }
        }
    });
    join_all(futures).await
}

/// Check tool arguments against the declared parameter schema.
#[cfg(feature = "json-validation")]
fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| format!("invalid tool schema: {e}"))?;
    if let Err(errors) = compiled.validate(arguments) {
        let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(format!("invalid tool arguments: {}", detail.join("; ")));
    }
    Ok(())
}

impl Client {
    /// Convenience wrapper over [`generate`].
    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerateResult> {
        generate(self, options).await
    }
}

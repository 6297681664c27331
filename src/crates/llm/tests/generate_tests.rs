//! Agentic generate-loop tests over a scripted mock provider.

use async_trait::async_trait;
use llm::{
    generate, generate_object, Client, ContentPart, EventStream, FinishReason, GenerateOptions,
    LlmError, Message, ObjectOptions, Provider, Request, Response, RetryConfig, Role,
    StructuredOutputMode, Tool, ToolChoice, ToolExecutor, Usage,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Provider that replays a fixed script of responses.
struct ScriptedProvider {
    name: String,
    script: Mutex<Vec<Response>>,
    calls: AtomicUsize,
    structured_mode: StructuredOutputMode,
    /// Requests seen, for shape assertions.
    seen: Mutex<Vec<Request>>,
}

impl ScriptedProvider {
    fn new(name: &str, script: Vec<Response>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            structured_mode: StructuredOutputMode::ToolCall,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> llm::Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(LlmError::Config("script exhausted".into()));
        }
        Ok(script.remove(0))
    }

    async fn stream(&self, _request: Request) -> llm::Result<EventStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    fn structured_output_mode(&self) -> StructuredOutputMode {
        self.structured_mode
    }
}

fn response(parts: Vec<ContentPart>, finish: FinishReason, output_tokens: u64) -> Response {
    Response {
        id: "r".into(),
        model: "m".into(),
        provider: "mock".into(),
        message: Message::with_parts(Role::Assistant, parts),
        finish_reason: finish,
        raw_finish_reason: None,
        usage: Usage {
            input_tokens: 10,
            output_tokens,
            ..Usage::default()
        },
        warnings: Vec::new(),
        rate_limit: None,
        raw_body: None,
    }
}

fn tool_call_response(call_id: &str, name: &str, args: Value) -> Response {
    response(
        vec![ContentPart::ToolCall {
            id: call_id.into(),
            name: name.into(),
            arguments: args,
        }],
        FinishReason::ToolCalls,
        5,
    )
}

struct CountingExecutor {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, arguments: Value) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err("tool exploded".to_string())
        } else {
            Ok(json!({"echo": arguments}))
        }
    }
}

fn tool_with_executor(name: &str, executor: Arc<CountingExecutor>) -> Tool {
    Tool::new(name, "test tool", json!({"type": "object"})).with_executor(executor)
}

#[tokio::test]
async fn two_step_tool_round_aggregates_usage() {
    // Scenario: a tool-call response, then a text response.
    let provider = ScriptedProvider::new(
        "mock",
        vec![
            tool_call_response("c1", "lookup", json!({"q": "x"})),
            response(vec![ContentPart::text("final answer")], FinishReason::Stop, 7),
        ],
    );
    let client = Client::new().with_provider(provider.clone());
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: false,
    });

    let result = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("go")
            .with_tools(vec![tool_with_executor("lookup", executor.clone())])
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.text, "final answer");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls(), 2);
    // total = sum of per-step usage.
    assert_eq!(result.total_usage.output_tokens, 5 + 7);
    assert_eq!(result.total_usage.input_tokens, 20);
    assert_eq!(result.usage.output_tokens, 7);
}

#[tokio::test]
async fn tool_loop_bounded_by_max_rounds() {
    // The model always asks for tools; with k rounds allowed, complete runs
    // exactly k+1 times and k execution rounds happen.
    let k = 3u32;
    let script: Vec<Response> = (0..=k)
        .map(|i| tool_call_response(&format!("c{i}"), "lookup", json!({})))
        .collect();
    let provider = ScriptedProvider::new("mock", script);
    let client = Client::new().with_provider(provider.clone());
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: false,
    });

    let result = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("go")
            .with_tools(vec![tool_with_executor("lookup", executor.clone())])
            .with_max_tool_rounds(k)
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    assert_eq!(provider.calls(), (k + 1) as usize);
    assert_eq!(executor.calls.load(Ordering::SeqCst), k as usize);
    assert_eq!(result.finish_reason, FinishReason::ToolCalls);
}

#[tokio::test]
async fn zero_rounds_disables_execution() {
    let provider = ScriptedProvider::new(
        "mock",
        vec![tool_call_response("c1", "lookup", json!({}))],
    );
    let client = Client::new().with_provider(provider.clone());
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: false,
    });

    let result = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("go")
            .with_tools(vec![tool_with_executor("lookup", executor.clone())])
            .with_max_tool_rounds(0)
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.steps.len(), 1);
}

#[tokio::test]
async fn throwing_tool_becomes_error_result() {
    let provider = ScriptedProvider::new(
        "mock",
        vec![
            tool_call_response("c1", "boom", json!({})),
            response(vec![ContentPart::text("recovered")], FinishReason::Stop, 1),
        ],
    );
    let client = Client::new().with_provider(provider);
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: true,
    });

    let result = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("go")
            .with_tools(vec![tool_with_executor("boom", executor)])
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    // Never rethrown: the failure is an error tool-result.
    let record = &result.steps[0].tool_results[0];
    assert!(record.is_error);
    assert_eq!(record.content, json!("tool exploded"));
    assert_eq!(result.text, "recovered");
}

#[tokio::test]
async fn unknown_tool_becomes_error_result() {
    let provider = ScriptedProvider::new(
        "mock",
        vec![
            tool_call_response("c1", "ghost", json!({})),
            response(vec![ContentPart::text("done")], FinishReason::Stop, 1),
        ],
    );
    let client = Client::new().with_provider(provider);
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: false,
    });

    let result = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("go")
            .with_tools(vec![tool_with_executor("lookup", executor)])
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    let record = &result.steps[0].tool_results[0];
    assert!(record.is_error);
    assert!(record.content.as_str().unwrap().contains("unknown tool"));
}

#[tokio::test]
async fn tool_results_feed_back_into_conversation() {
    let provider = ScriptedProvider::new(
        "mock",
        vec![
            tool_call_response("c1", "lookup", json!({"q": "rust"})),
            response(vec![ContentPart::text("used it")], FinishReason::Stop, 1),
        ],
    );
    let client = Client::new().with_provider(provider.clone());
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: false,
    });

    generate(
        &client,
        GenerateOptions::new("m")
            .with_system("be helpful")
            .with_messages(vec![Message::user("find rust")])
            .with_tools(vec![tool_with_executor("lookup", executor)])
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    let seen = provider.seen.lock().unwrap();
    // Round 2 request: system, user, assistant (tool call), tool result.
    let second = &seen[1];
    let roles: Vec<Role> = second.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::Tool]);
    assert_eq!(second.messages[3].tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn prompt_and_messages_are_mutually_exclusive() {
    let provider = ScriptedProvider::new("mock", vec![]);
    let client = Client::new().with_provider(provider);
    let err = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("p")
            .with_messages(vec![Message::user("u")]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LlmError::Config(_)));
}

#[tokio::test]
async fn stop_when_halts_the_loop() {
    let provider = ScriptedProvider::new(
        "mock",
        vec![
            tool_call_response("c1", "lookup", json!({})),
            tool_call_response("c2", "lookup", json!({})),
        ],
    );
    let client = Client::new().with_provider(provider.clone());
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        fail: false,
    });

    let result = generate(
        &client,
        GenerateOptions::new("m")
            .with_prompt("go")
            .with_tools(vec![tool_with_executor("lookup", executor)])
            .with_max_tool_rounds(5)
            .with_stop_when(Box::new(|steps| !steps.is_empty()))
            .with_retry(RetryConfig::none()),
    )
    .await
    .unwrap();

    // stop_when satisfied after the first step: no tool round runs.
    assert_eq!(provider.calls(), 1);
    assert_eq!(result.steps.len(), 1);
}

#[tokio::test]
async fn retryable_errors_are_retried_around_complete() {
    struct FlakyProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: Request) -> llm::Result<Response> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(LlmError::Server {
                    provider: "flaky".into(),
                    message: "boom".into(),
                    status: 503,
                    code: None,
                })
            } else {
                Ok(response(vec![ContentPart::text("ok")], FinishReason::Stop, 1))
            }
        }

        async fn stream(&self, _request: Request) -> llm::Result<EventStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    let provider = Arc::new(FlakyProvider {
        calls: AtomicUsize::new(0),
    });
    let client = Client::new().with_provider(provider.clone());

    let result = generate(
        &client,
        GenerateOptions::new("m").with_prompt("go").with_retry(
            RetryConfig::default()
                .with_max_attempts(5)
                .with_jitter(false)
                .with_sleep_enabled(false),
        ),
    )
    .await
    .unwrap();

    assert_eq!(result.text, "ok");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn structured_output_via_forced_tool_call() {
    // ToolCall mode: the object rides in the forced tool call's arguments.
    let provider = ScriptedProvider::new(
        "mock",
        vec![tool_call_response(
            "c1",
            "extraction",
            json!({"name": "Ada", "age": 36}),
        )],
    );
    let client = Client::new().with_provider(provider.clone());

    let (object, result) = generate_object(
        &client,
        ObjectOptions::new(
            GenerateOptions::new("m")
                .with_prompt("extract")
                .with_retry(RetryConfig::none()),
            "extraction",
            json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        ),
    )
    .await
    .unwrap();

    assert_eq!(object, json!({"name": "Ada", "age": 36}));
    assert_eq!(result.steps.len(), 1);
    // The forced tool choice reached the provider, with zero rounds.
    let seen = provider.seen.lock().unwrap();
    assert_eq!(
        seen[0].tool_choice,
        Some(ToolChoice::Named("extraction".into()))
    );
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn structured_output_empty_is_typed_error() {
    let provider = ScriptedProvider::new(
        "mock",
        vec![response(vec![], FinishReason::Stop, 0)],
    );
    let client = Client::new().with_provider(provider);

    let err = generate_object(
        &client,
        ObjectOptions::new(
            GenerateOptions::new("m")
                .with_prompt("extract")
                .with_retry(RetryConfig::none()),
            "extraction",
            json!({"type": "object"}),
        ),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LlmError::NoObjectGenerated { .. }));
}

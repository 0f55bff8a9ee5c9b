//! End-to-end integration tests for skillrun.
//!
//! These tests drive the real tool registry, orchestration loop, event
//! bridge and gateway router against a scripted in-process provider.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use skillrun_agent::{AgentLoop, EventBridge, ITERATION_LIMIT_MESSAGE, TurnOutcome};
use skillrun_config::AppConfig;
use skillrun_core::error::ConnectionError;
use skillrun_core::event::StreamEvent;
use skillrun_core::message::{Conversation, Role, ToolCall};
use skillrun_core::provider::{ModelResponse, Provider, ProviderRequest};
use skillrun_gateway::{GatewayState, build_router};
use skillrun_tools::registry_from_config;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence, then
/// repeats the last one.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ModelResponse>>,
    last: Mutex<Option<ModelResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn offered_tools(&self, call: usize) -> Vec<String> {
        self.requests()[call].tools.iter().map(|t| t.name.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ConnectionError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(response) = next {
            *last = Some(response);
        }
        last.clone()
            .ok_or_else(|| ConnectionError::InvalidResponse("ScriptedProvider has no responses".into()))
    }
}

fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: text.into(),
        ..Default::default()
    }
}

fn tool_response(thought: &str, name: &str, args: Value) -> ModelResponse {
    ModelResponse {
        content: thought.into(),
        tool_calls: vec![ToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments: args.to_string(),
        }],
        ..Default::default()
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.tools.workspace_dir = root.to_path_buf();
    config.skills.dir = root.join("skills");
    config.server.poll_interval_ms = 20;
    config
}

fn agent(config: &AppConfig, provider: Arc<ScriptedProvider>) -> Arc<AgentLoop> {
    let tools = registry_from_config(config).unwrap();
    Arc::new(AgentLoop::from_config(provider, tools, config))
}

/// Run one turn through the bridge and collect every event.
async fn run_turn(config: &AppConfig, provider: Arc<ScriptedProvider>, message: &str) -> (Vec<StreamEvent>, TurnOutcome, Conversation) {
    let agent = agent(config, provider);
    let metadata = config.system_metadata().unwrap();
    let mut conversation = Conversation::new(&config.active_model().system_message, &metadata);
    let message = message.to_string();

    let bridge = EventBridge::from_config(&config.server);
    let (stream, handle) = bridge.start(move |sink| async move {
        let outcome = agent.run_turn(&mut conversation, &message, &sink).await;
        (outcome, conversation)
    });

    let events = stream.collect().await;
    let (outcome, conversation) = handle.join().await.unwrap();
    (events, outcome, conversation)
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

fn tool_results(events: &[StreamEvent]) -> Vec<(String, Value)> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolResult { tool_name, result } => {
                Some((tool_name.clone(), serde_json::from_str(result).unwrap_or(Value::Null)))
            }
            _ => None,
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_direct_answer_no_tools() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![text_response("Hello there.")]);

    let (events, outcome, conversation) = run_turn(&test_config(tmp.path()), provider.clone(), "hi").await;

    assert_eq!(events, vec![StreamEvent::content("Hello there."), StreamEvent::Done]);
    assert!(outcome.is_finished());
    assert_eq!(conversation.messages().len(), 3);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn e2e_calculator_tool_invocation() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response("I'll calculate that.", "calculate", json!({"expression": "15 * 23"})),
        text_response("15 times 23 is 345."),
    ]);

    let (events, outcome, conversation) = run_turn(&test_config(tmp.path()), provider, "What is 15 * 23?").await;

    assert_eq!(kinds(&events), vec!["thinking", "tool_call", "tool_result", "content", "done"]);
    assert_eq!(tool_results(&events)[0].1["result"], 345);
    assert_eq!(outcome.content(), Some("15 times 23 is 345."));

    let tool_message = &conversation.messages()[3];
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_calculate"));
}

#[tokio::test]
async fn e2e_iteration_cap_ends_with_error_then_done() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.tools.max_tool_calls = 3;
    let provider = ScriptedProvider::new(vec![tool_response("", "get_datetime", json!({}))]);

    let (events, outcome, _) = run_turn(&config, provider.clone(), "what time is it, forever?").await;

    assert_eq!(outcome, TurnOutcome::IterationExhausted { iterations: 3 });
    assert_eq!(events.iter().filter(|e| e.kind() == "tool_call").count(), 3);
    let tail = &events[events.len() - 2..];
    assert_eq!(tail, &[StreamEvent::error(ITERATION_LIMIT_MESSAGE), StreamEvent::Done]);
    assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test]
async fn e2e_skill_unlocks_tool_for_next_step() {
    let tmp = tempfile::tempdir().unwrap();
    let skill_dir = tmp.path().join("skills").join("weather");
    std::fs::create_dir_all(&skill_dir).unwrap();
    std::fs::write(
        skill_dir.join("SKILL.md"),
        "---\nname: weather\ndescription: Look up the weather\nallowed-tools: http\n---\nFetch the forecast for {city} with the http tool.",
    )
    .unwrap();

    let provider = ScriptedProvider::new(vec![
        tool_response("", "skill", json!({"skill_name": "weather", "args": {"city": "Lisbon"}})),
        text_response("It is sunny in Lisbon."),
    ]);
    let (events, outcome, conversation) =
        run_turn(&test_config(tmp.path()), provider.clone(), "Weather in Lisbon?").await;

    assert!(outcome.is_finished());
    assert!(!provider.offered_tools(0).contains(&"http".to_string()));
    assert!(provider.offered_tools(1).contains(&"http".to_string()));

    let injected = conversation
        .messages()
        .iter()
        .filter(|m| m.role == Role::User)
        .last()
        .unwrap();
    assert!(injected.content.contains("Fetch the forecast for Lisbon"));
    assert_eq!(kinds(&events), vec!["tool_call", "tool_result", "content", "done"]);
}

#[tokio::test]
async fn e2e_unknown_skill_is_fed_back() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response("", "skill", json!({"skill_name": "ghost"})),
        text_response("That skill does not exist."),
    ]);

    let (events, outcome, _) = run_turn(&test_config(tmp.path()), provider, "use ghost").await;

    assert!(outcome.is_finished());
    let errors: Vec<&StreamEvent> = events.iter().filter(|e| e.kind() == "tool_error").collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].data().contains("ghost"));
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_script_calls_tools_and_streams_console() {
    let tmp = tempfile::tempdir().unwrap();
    let code = "console.log('computing'); return callTool('calculate', {expression: '2 ** 10'}).result";
    let provider = ScriptedProvider::new(vec![
        tool_response("", "javascript", json!({"code": code})),
        text_response("1024"),
    ]);

    let (events, _, _) = run_turn(&test_config(tmp.path()), provider, "2^10 via script").await;

    assert_eq!(kinds(&events), vec!["tool_call", "console", "tool_result", "content", "done"]);
    let (name, result) = &tool_results(&events)[0];
    assert_eq!(name, "javascript");
    assert_eq!(result["result"], 1024);
    assert_eq!(result["console"], json!(["computing"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_script_failure_does_not_end_turn() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response("", "javascript", json!({"code": "throw new Error('bad input')"})),
        text_response("The script failed."),
    ]);

    let (events, outcome, _) = run_turn(&test_config(tmp.path()), provider, "run it").await;

    assert!(outcome.is_finished());
    let StreamEvent::ToolError { message } = &events[1] else {
        panic!("expected tool_error, got {:?}", events[1]);
    };
    assert!(message.starts_with("Tool execution error: "));
    assert!(message.contains("bad input"));
}

#[cfg(unix)]
#[tokio::test]
async fn e2e_read_file_then_bash() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "line one\nline two\n").unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response("", "read_file", json!({"file_path": "notes.txt"})),
        tool_response("", "bash", json!({"command": "wc -l < notes.txt"})),
        text_response("The file has two lines."),
    ]);

    let (events, outcome, _) = run_turn(&test_config(tmp.path()), provider, "count lines").await;

    assert!(outcome.is_finished());
    let results = tool_results(&events);
    assert_eq!(results[0].1["content"], "line one\nline two\n");
    assert_eq!(results[1].1["stdout"].as_str().unwrap().trim(), "2");
}

#[tokio::test]
async fn e2e_tool_outside_allowed_set_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response("", "http", json!({"url": "http://127.0.0.1:9"})),
        text_response("I cannot fetch that."),
    ]);

    let (events, outcome, _) = run_turn(&test_config(tmp.path()), provider.clone(), "fetch").await;

    assert!(outcome.is_finished());
    assert_eq!(kinds(&events), vec!["tool_call", "tool_error", "content", "done"]);
    assert!(!provider.offered_tools(0).contains(&"http".to_string()));
}

#[tokio::test]
async fn e2e_gateway_health_tools_and_stream() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let provider = ScriptedProvider::new(vec![
        tool_response("", "calculate", json!({"expression": "max(3, 9)"})),
        text_response("9 is larger."),
    ]);
    let state = Arc::new(GatewayState::from_config(&config, agent(&config, provider)).unwrap());
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/tools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["count"], 7);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chat/stream?message=which%20is%20larger")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: tool_call\ndata: {"));
    assert!(text.contains("\"name\":\"calculate\""));
    assert!(text.contains("event: content\ndata: {\"content\":\"9 is larger.\"}\n\n"));
    assert!(text.ends_with("event: done\ndata: \n\n"));
}

#[test]
fn e2e_config_defaults_and_validation() {
    let config = AppConfig::default();
    config.validate().unwrap();
    assert_eq!(config.tools.max_tool_calls, 10);
    assert!(!config.tools.allowed_tools.contains(&"http".to_string()));

    let bad = AppConfig::from_toml("[tools]\nmax_tool_calls = 0");
    assert!(bad.is_err());

    let bridge_poll = Duration::from_millis(config.server.poll_interval_ms);
    assert_eq!(bridge_poll, Duration::from_secs(1));
}

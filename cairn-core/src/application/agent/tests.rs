use super::*;
use crate::application::tooling::{SessionToolInfo, ToolInvokeError, ToolSession};
use crate::config::{StageModelConfig, StageModels};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct ScriptedProvider {
    responses: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(String::from).collect(),
            )),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError> {
        self.requests.lock().await.push(request);
        let mut responses = self.responses.lock().await;
        assert!(!responses.is_empty(), "unexpected extra model call");
        Ok(responses.remove(0))
    }
}

struct FailingProvider;

#[async_trait]
impl ModelProvider for FailingProvider {
    async fn complete(&self, _request: ModelRequest) -> Result<String, ModelError> {
        Err(ModelError::invalid_response("stub", "provider down"))
    }
}

struct StubSession {
    tools: Vec<String>,
    payloads: Arc<Mutex<Vec<Result<String, String>>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl StubSession {
    fn new(tools: &[&str], payloads: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            tools: tools.iter().map(|name| name.to_string()).collect(),
            payloads: Arc::new(Mutex::new(payloads)),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ToolSession for StubSession {
    async fn list_tools(&self) -> Result<Vec<SessionToolInfo>, ToolInvokeError> {
        Ok(self
            .tools
            .iter()
            .map(|name| SessionToolInfo {
                name: name.clone(),
                description: Some("stub tool".to_string()),
                input_schema: Some(json!({"type": "object", "properties": {}})),
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, ToolInvokeError> {
        self.calls.lock().await.push((tool.to_string(), arguments));
        let mut payloads = self.payloads.lock().await;
        assert!(!payloads.is_empty(), "unexpected extra tool call");
        match payloads.remove(0) {
            Ok(payload) => Ok(payload),
            Err(message) => Err(ToolInvokeError::Transport {
                server: "stub".to_string(),
                message,
            }),
        }
    }
}

/// Distinct model names per stage so tests can assert which stages ran.
fn stage_settings() -> AgentSettings {
    fn stage(model: &str) -> StageModelConfig {
        StageModelConfig {
            model: model.to_string(),
            temperature: 0.1,
        }
    }

    AgentSettings {
        stages: StageModels {
            decide: stage("m-decide"),
            select: stage("m-select"),
            evaluate: stage("m-evaluate"),
            answer: stage("m-answer"),
            answer_direct: stage("m-direct"),
            vision: stage("m-vision"),
        },
        history_window: 10,
        tool_call_timeout: Duration::from_secs(5),
    }
}

fn tools_with(names: &[&str]) -> BTreeMap<String, ToolSpec> {
    names
        .iter()
        .map(|name| {
            (
                name.to_string(),
                ToolSpec {
                    description: "stub tool".to_string(),
                    input_schema: json!({"type": "object", "properties": {}}),
                },
            )
        })
        .collect()
}

fn request_for<'run>(query: &str, sessions: &'run SessionMap) -> QueryRequest<'run> {
    QueryRequest {
        query: query.to_string(),
        available_tools: tools_with(&["search_elog"]),
        sessions,
        max_iterations: 3,
        history: Vec::new(),
        context_files: Vec::new(),
    }
}

fn model_sequence(requests: &[ModelRequest]) -> Vec<&str> {
    requests.iter().map(|r| r.model.as_str()).collect()
}

#[tokio::test]
async fn greeting_skips_tools_entirely() {
    let session = StubSession::new(&["search_elog"], vec![]);
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": false, "reasoning": "greeting"}"#,
        "Hello! How can I help?",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let answer = agent
        .process_query(request_for("hello", &sessions), None)
        .await;

    assert_eq!(answer, "Hello! How can I help?");
    let requests = provider.requests().await;
    assert_eq!(model_sequence(&requests), vec!["m-decide", "m-direct"]);
    assert!(session.calls().await.is_empty());
}

#[tokio::test]
async fn single_successful_round_grounds_the_answer() {
    let payload = json!({
        "results": {
            "hits": [{
                "elog_id": 7,
                "title": "Vacuum incident",
                "url": "https://elog.example/7",
                "timestamp": "Mon, 03 Nov 2025 08:15:00 +0100",
                "formatted_context": "entry body"
            }]
        }
    });
    let session = StubSession::new(&["search_elog"], vec![Ok(payload.to_string())]);
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": true, "reasoning": "operational question"}"#,
        r#"{"tools": [{"tool_name": "search_elog", "arguments": {"query": "vacuum"}, "reasoning": "logbook"}]}"#,
        r#"{"adequate": true, "reasoning": "one relevant hit", "refinement": ""}"#,
        "The vacuum incident is documented in ELOG 7.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let answer = agent
        .process_query(request_for("what happened with the vacuum?", &sessions), None)
        .await;

    assert_eq!(answer, "The vacuum incident is documented in ELOG 7.");

    // Exactly one selection, one execution batch, one evaluation.
    let requests = provider.requests().await;
    assert_eq!(
        model_sequence(&requests),
        vec!["m-decide", "m-select", "m-evaluate", "m-answer"]
    );

    let calls = session.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "search_elog");
    assert_eq!(calls[0].1, json!({"query": "vacuum"}));

    // The synthesis prompt carries the grounding context and reference.
    let answer_prompt = &requests[3].messages[0].content;
    assert!(answer_prompt.contains("entry body"));
    assert!(answer_prompt.contains("ELOG-1"));
}

#[tokio::test]
async fn failing_tools_exhaust_the_budget_then_answer_anyway() {
    let session = StubSession::new(
        &["search_elog"],
        vec![
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
        ],
    );
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let select = r#"{"tools": [{"tool_name": "search_elog", "arguments": {"query": "x"}, "reasoning": "r"}]}"#;
    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": true, "reasoning": "needs logs"}"#,
        select,
        select,
        select,
        "Here is what I can tell you despite the failures.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let answer = agent
        .process_query(request_for("summarize last weekend", &sessions), None)
        .await;

    assert_eq!(answer, "Here is what I can tell you despite the failures.");
    assert_eq!(session.calls().await.len(), 3);

    let requests = provider.requests().await;
    // All-failed evaluation rounds never consult the model; the budget is
    // spent on three selection rounds before forced adequacy.
    assert_eq!(
        model_sequence(&requests),
        vec!["m-decide", "m-select", "m-select", "m-select", "m-answer"]
    );

    // Refinement context from the failed round reaches the next selection.
    let retry_prompt = &requests[2].messages[0].content;
    assert!(retry_prompt.contains("Previous Attempt #1 Failed"));
    assert!(retry_prompt.contains("All tool calls failed with errors"));
    assert!(retry_prompt.contains("connection reset"));
}

#[tokio::test]
async fn empty_decision_response_defaults_to_tools() {
    let session = StubSession::new(&["search_elog"], vec![]);
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let provider = Arc::new(ScriptedProvider::new(vec![
        "",
        r#"{"tools": []}"#,
        "Answer without any tool grounding.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let answer = agent
        .process_query(request_for("anything new?", &sessions), None)
        .await;

    assert_eq!(answer, "Answer without any tool grounding.");
    let requests = provider.requests().await;
    // Empty decision output means "attempt retrieval": the selection
    // stage runs; its empty selection is adequate-but-empty, and the
    // empty round does not consume the budget or call the evaluator.
    assert_eq!(
        model_sequence(&requests),
        vec!["m-decide", "m-select", "m-answer"]
    );
    assert!(session.calls().await.is_empty());
}

#[tokio::test]
async fn malformed_decision_response_defaults_to_no_tools_even_with_images() {
    let sessions: SessionMap = BTreeMap::new();

    let provider = Arc::new(ScriptedProvider::new(vec![
        "certainly! tools would help here",
        "Direct answer.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let mut request = request_for("what is in this image?", &sessions);
    request.context_files = vec![ContextFile::image(
        "1",
        "plot.png",
        "image/png",
        Some("aGVsbG8=".to_string()),
    )];

    let answer = agent.process_query(request, None).await;

    assert_eq!(answer, "Direct answer.");
    // Malformed output fails closed: no tools AND no vision routing,
    // distinct from the empty-response default above.
    let requests = provider.requests().await;
    assert_eq!(model_sequence(&requests), vec!["m-decide", "m-direct"]);
}

#[tokio::test]
async fn unparseable_selection_yields_empty_batch() {
    let session = StubSession::new(&["search_elog"], vec![]);
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": true, "reasoning": "sure"}"#,
        "I think we should call some tools maybe",
        "Answer after nothing executed.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let answer = agent
        .process_query(request_for("query", &sessions), None)
        .await;

    assert_eq!(answer, "Answer after nothing executed.");
    assert!(session.calls().await.is_empty());
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let payload = json!({"results": [{"title": "doc", "url": "https://w/doc"}]});
    let session = StubSession::new(&["web_search"], vec![Ok(payload.to_string())]);
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": true, "reasoning": "external info"}"#,
        r#"{"tools": [
            {"tool_name": "missing_tool", "arguments": {}, "reasoning": "gone"},
            {"tool_name": "web_search", "arguments": {"query": "beam"}, "reasoning": "web"}
        ]}"#,
        r#"{"adequate": true, "reasoning": "found data", "refinement": ""}"#,
        "Answer from the surviving call.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let mut request = request_for("query", &sessions);
    request.available_tools = tools_with(&["missing_tool", "web_search"]);
    let answer = agent.process_query(request, None).await;

    assert_eq!(answer, "Answer from the surviving call.");
    // The unknown tool became a failure record without stopping the batch.
    assert_eq!(session.calls().await.len(), 1);

    let requests = provider.requests().await;
    let evaluate_prompt = &requests[2].messages[0].content;
    assert!(evaluate_prompt.contains("web_search"));
}

#[tokio::test]
async fn empty_synthesis_output_falls_back_to_source_listing() {
    let payload = json!({"results": [{"title": "Weather today", "url": "https://weather.example/x"}]});
    let session = StubSession::new(&["web_search"], vec![Ok(payload.to_string())]);
    let mut sessions: SessionMap = BTreeMap::new();
    sessions.insert("stub".to_string(), session.clone());

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": true, "reasoning": "weather"}"#,
        r#"{"tools": [{"tool_name": "web_search", "arguments": {"query": "weather"}, "reasoning": "w"}]}"#,
        r#"{"adequate": true, "reasoning": "ok", "refinement": ""}"#,
        "",
    ]));
    let agent = Agent::new(provider, stage_settings());

    let mut request = request_for("weather?", &sessions);
    request.available_tools = tools_with(&["web_search"]);
    let answer = agent.process_query(request, None).await;

    assert!(answer.contains("unable to generate a complete answer"));
    assert!(answer.contains("[Weather today](https://weather.example/x)"));
}

#[tokio::test]
async fn vision_path_analyzes_uploaded_images() {
    let sessions: SessionMap = BTreeMap::new();

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": false, "reasoning": "question about the upload"}"#,
        "The image shows a synchrotron layout.",
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let mut request = request_for("what is in this image?", &sessions);
    request.context_files = vec![ContextFile::image(
        "1",
        "layout.png",
        "image/png",
        Some("aW1hZ2VkYXRh".to_string()),
    )];

    let answer = agent.process_query(request, None).await;

    assert_eq!(answer, "The image shows a synchrotron layout.");
    let requests = provider.requests().await;
    assert_eq!(model_sequence(&requests), vec!["m-decide", "m-vision"]);
    assert_eq!(requests[1].images.len(), 1);
}

#[tokio::test]
async fn vision_without_image_data_answers_fixed_string_without_model_call() {
    let sessions: SessionMap = BTreeMap::new();

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": false, "reasoning": "question about the upload"}"#,
    ]));
    let agent = Agent::new(provider.clone(), stage_settings());

    let mut request = request_for("what is in this image?", &sessions);
    request.context_files = vec![ContextFile::image("1", "broken.png", "image/png", None)];

    let answer = agent.process_query(request, None).await;

    assert_eq!(answer, "Unable to load image data for analysis.");
    // Only the decision consulted the model.
    assert_eq!(provider.requests().await.len(), 1);
}

#[test]
fn vision_routing_beats_tool_routing() {
    let sessions: SessionMap = BTreeMap::new();
    let mut state = AgentState::new(request_for("q", &sessions));
    state.needs_tools = true;
    state.requires_vision = true;
    assert_eq!(route_after_decision(&state), Stage::AnswerVision);
}

#[test]
fn evaluation_routing_honors_budget() {
    let sessions: SessionMap = BTreeMap::new();
    let mut state = AgentState::new(request_for("q", &sessions));

    state.results_adequate = false;
    state.iteration = 1;
    assert_eq!(route_after_evaluation(&state), Stage::Select);

    state.iteration = 3;
    assert_eq!(route_after_evaluation(&state), Stage::AnswerWithTools);

    state.results_adequate = true;
    state.iteration = 0;
    assert_eq!(route_after_evaluation(&state), Stage::AnswerWithTools);
}

struct CollectingSink {
    collected: std::sync::Mutex<String>,
}

impl TokenSink for CollectingSink {
    fn on_token(&self, fragment: &str) {
        self.collected.lock().unwrap().push_str(fragment);
    }
}

#[tokio::test]
async fn streamed_and_returned_content_match() {
    let sessions: SessionMap = BTreeMap::new();

    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"needs_tools": false, "reasoning": "greeting"}"#,
        "Streamed answer text.",
    ]));
    let agent = Agent::new(provider, stage_settings());

    let sink = CollectingSink {
        collected: std::sync::Mutex::new(String::new()),
    };
    let answer = agent
        .process_query(request_for("hello", &sessions), Some(&sink))
        .await;

    assert_eq!(answer, "Streamed answer text.");
    assert_eq!(*sink.collected.lock().unwrap(), answer);
}

#[tokio::test]
async fn total_provider_failure_still_returns_an_answer_string() {
    let sessions: SessionMap = BTreeMap::new();
    let agent = Agent::new(Arc::new(FailingProvider), stage_settings());

    let answer = agent
        .process_query(request_for("anything", &sessions), None)
        .await;

    // Decision fails closed to the direct path, whose model failure is
    // reported as text rather than raised.
    assert!(answer.starts_with("Error generating answer:"));
}

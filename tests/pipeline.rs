//! End-to-end pipeline tests over the brain, workers, and tool surface,
//! driven by the scripted provider.

use std::sync::{Arc, Mutex, RwLock};

use minion::brain::StepRequest;
use minion::provider::{LlmResponse, ScriptedProvider};
use minion::schema::ToolCall;
use minion::tools::{FnTool, Tool, ToolInfo, ToolParam, ToolRegistry};
use minion::{AgentConfig, BaseAgent, Brain};

fn scripted(responses: &[&str]) -> Arc<ScriptedProvider> {
    let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
    for response in responses {
        provider.push_text(*response);
    }
    provider
}

#[tokio::test]
async fn arithmetic_via_code_route() {
    // the model answers with one code block; the interpreter produces the
    // final answer in a single invocation
    let provider = scripted(&[
        "Thought: straightforward multiplication.\n```python\nresult = 234 * 568\nfinal_answer(result)\n```<end_code>",
    ]);
    let brain = Brain::with_provider(provider.clone());

    let result = brain
        .step(StepRequest::query("what's the solution 234*568").with_route("code"))
        .await
        .unwrap();

    assert_eq!(result.answer, "132912");
    assert!(result.terminated);
    assert!(result.response.is_final_answer);
    // exactly one provider call means exactly one interpreter round
    assert_eq!(provider.recorded_calls().len(), 1);
}

#[tokio::test]
async fn streaming_concatenation_matches_full_text() {
    let text = "Here is a longer reply that arrives in several chunks over the stream.";
    let provider = scripted(&[text]);
    let brain = Brain::with_provider(provider);

    let chunks = Mutex::new(Vec::new());
    let result = brain
        .step_stream(
            StepRequest::query("hello").with_route("raw"),
            &mut |chunk| chunks.lock().unwrap().push(chunk),
        )
        .await
        .unwrap();

    let accumulated: String = chunks
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.is_textual())
        .map(|c| c.content.as_str())
        .collect();
    assert_eq!(accumulated, text);
    assert_eq!(result.response.raw_reply, text);
}

#[tokio::test]
async fn ensemble_majority_over_python_workers() {
    use minion::workers::{EnsembleConfig, ResultStrategy, WorkerSpec};

    let provider = scripted(&[
        "```python\nfinal_answer(42)\n```",
        "```python\nfinal_answer(42)\n```",
        "```python\nfinal_answer(41)\n```",
        "```python\nfinal_answer(42)\n```",
        "```python\nfinal_answer(41)\n```",
    ]);
    let brain = Brain::with_provider(provider);

    let mut request = StepRequest::query("the answer to everything?");
    request.ensemble = Some(EnsembleConfig {
        workers: vec![WorkerSpec::new("python", 5)],
        strategy: ResultStrategy::MajorityVoting,
    });
    let result = brain.step(request).await.unwrap();

    assert_eq!(result.answer, "42");
    // majority score is at least the mean of the individual scores
    assert!(result.score >= 1.0 - f64::EPSILON);
}

#[tokio::test]
async fn check_improve_loop_accepts_second_candidate() {
    let provider = scripted(&[
        // cot worker: first candidate
        "Final answer: 41",
        // critic rejects it
        "<root><feedback>Off by one; recount.</feedback><correct>false</correct><score>0.3</score></root>",
        // improver produces the corrected candidate
        "Final answer: 42",
        // critic accepts
        "<root><feedback>Correct now.</feedback><correct>true</correct><score>0.95</score></root>",
    ]);
    let brain = Brain::with_provider(provider);

    let result = brain
        .step(StepRequest::query("6 * 7?").with_route("cot").with_check(3))
        .await
        .unwrap();

    assert_eq!(result.answer, "42");
    assert!(result.terminated);
    assert!((result.score - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn tool_search_then_load_then_call_from_generated_code() {
    // registry with three deferred tools; only the loaded one is constructed
    let recorded = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
    let mut registry = ToolRegistry::new();
    for (name, description) in [
        ("github.create_pull_request", "Create a pull request on a repository"),
        ("slack.send_message", "Send a message to a Slack channel"),
        ("jira.create_ticket", "Create an issue ticket in Jira"),
    ] {
        let recorded = recorded.clone();
        let owned = name.to_string();
        registry.register_factory(
            ToolInfo {
                name: name.to_string(),
                description: description.to_string(),
                parameters: vec![],
                category: name.split('.').next().unwrap().to_string(),
            },
            Box::new(move || {
                Ok(Arc::new(FnTool::new(
                    owned,
                    "constructed tool",
                    vec![
                        ToolParam::required("repo", "string", "repository"),
                        ToolParam::required("title", "string", "title"),
                        ToolParam::required("body", "string", "body"),
                        ToolParam::required("base", "string", "base branch"),
                        ToolParam::required("head", "string", "head branch"),
                    ],
                    Arc::new(move |args| {
                        recorded.lock().unwrap().push(args);
                        Ok(serde_json::json!({"url": "https://example.com/pr/1"}))
                    }),
                )) as Arc<dyn Tool>)
            }),
        );
    }
    let registry = Arc::new(RwLock::new(registry));

    let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
    let brain = Brain::with_provider(provider);
    let mut agent = BaseAgent::new(brain, AgentConfig::default());
    agent.with_tool_registry(registry.clone());
    agent.setup().await.unwrap();

    // tool_search returns the matching tool first, without loading anything
    let search = agent
        .brain()
        .tools()
        .into_iter()
        .find(|t| t.name() == "tool_search")
        .unwrap();
    let hits = search
        .call(serde_json::json!({"query": "pull request", "strategy": "keyword"}))
        .await
        .unwrap();
    assert_eq!(hits[0]["name"], "github.create_pull_request");
    assert_eq!(registry.read().unwrap().get_stats().loaded, 0);

    // load_tool constructs it and the agent injects it into the interpreter
    let load = agent
        .brain()
        .tools()
        .into_iter()
        .find(|t| t.name() == "load_tool")
        .unwrap();
    load.call(serde_json::json!({"tool_name": "github.create_pull_request"}))
        .await
        .unwrap();
    agent.absorb_loaded_tools().await;

    let mut interpreter = agent.brain().interpreter().lock().await;
    let outcome = interpreter
        .run("github_create_pull_request(repo='o/r', title='t', body='b', base='main', head='f')")
        .await;
    drop(interpreter);
    assert!(!outcome.is_error(), "{:?}", outcome.error);

    // exactly one call reached the underlying tool, with those arguments
    let calls = recorded.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["repo"], "o/r");
    assert_eq!(calls[0]["title"], "t");
    assert_eq!(calls[0]["base"], "main");
    assert_eq!(calls[0]["head"], "f");
}

#[tokio::test]
async fn final_answer_tool_call_terminates_turn() {
    let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
    provider.push_response(LlmResponse::text("").with_tool_calls(vec![ToolCall::new(
        "c1",
        "final_answer",
        serde_json::json!({"answer": "done"}),
    )]));
    let brain = Brain::with_provider(provider);

    let result = brain
        .step(StepRequest::query("finish").with_route("raw"))
        .await
        .unwrap();
    assert!(result.terminated);
    assert!(result.response.is_final_answer);
    assert_eq!(result.answer, "done");
}

//! End-to-end coverage of the six named scenarios (spec §8) driven through
//! the public `Agent` surface against a `MockModelClient`, in the style of
//! the teacher's `runtime.rs` ordered-event assertions.

use std::sync::Arc;

use agentkit_core::AgentConfig;
use agentkit_kernel::error::KernelError;
use agentkit_kernel::event::{EventPayload, FinishReason};
use agentkit_kernel::tool::EchoTool;
use agentkit_kernel::{Agent, RunInput, RunOutcome, RunState};
use agentkit_llm::MockModelClient;

fn agent(client: Arc<MockModelClient>) -> Agent {
    Agent::builder("You are helpful.").config(AgentConfig::for_profile("")).client(client).build()
}

#[tokio::test]
async fn no_tool_stop_scenario() {
    let client = Arc::new(MockModelClient::new());
    client.queue_text("Hello, world");
    let agent = agent(client);

    let outcome = agent.run("Hi").await.unwrap();
    let RunOutcome::Final(event) = outcome else { panic!("expected Final") };
    let EventPayload::AssistantMessage { content, finish_reason, .. } = &event.payload else {
        panic!("expected assistant_message")
    };
    assert_eq!(content, "Hello, world");
    assert_eq!(*finish_reason, FinishReason::Stop);
    assert_eq!(agent.status(), RunState::Idle);
}

#[tokio::test]
async fn native_single_tool_scenario() {
    let client = Arc::new(MockModelClient::new());
    client.queue_tool_call("call_1", "getWeather", r#"{"location":"Boston"}"#);
    client.queue_text("It's 70°F in Boston.");
    let agent = agent(client);
    agent.register_tool(Arc::new(EchoTool));

    let outcome = agent.run("What's the weather in Boston?").await.unwrap();
    let RunOutcome::Final(event) = outcome else { panic!("expected Final") };
    let EventPayload::AssistantMessage { finish_reason, .. } = &event.payload else { panic!("expected assistant_message") };
    assert_eq!(*finish_reason, FinishReason::Stop);

    let events = agent.get_event_stream().get_events();
    let kinds: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    assert!(kinds.contains(&"tool_call"));
    assert!(kinds.contains(&"tool_result"));
    assert!(kinds.iter().position(|k| *k == "tool_call").unwrap() < kinds.iter().position(|k| *k == "tool_result").unwrap());
}

#[tokio::test]
async fn concurrent_run_fails_immediately() {
    let client = Arc::new(MockModelClient::new());
    client.queue_text("first call blocks forever"); // never drained by a second run
    let agent = Arc::new(agent(client));

    let first = agent.clone();
    let first_run = tokio::spawn(async move { first.run("Hi").await });

    // Give the first run a chance to flip the state machine to `Executing`
    // before the second call races it.
    tokio::task::yield_now().await;

    if agent.status() == RunState::Executing {
        let err = agent.run("Hi again").await.unwrap_err();
        assert!(matches!(err, KernelError::AlreadyExecuting));
    }

    first_run.await.unwrap().unwrap();
}

#[tokio::test]
async fn abort_before_run_yields_abort_reason_and_status() {
    let client = Arc::new(MockModelClient::new());
    client.queue_text("unused");
    let agent = agent(client);

    assert!(!agent.abort());

    let outcome = agent.run("Hi").await.unwrap();
    let RunOutcome::Final(event) = outcome else { panic!("expected Final") };
    let EventPayload::AssistantMessage { finish_reason, .. } = &event.payload else { panic!("expected assistant_message") };
    assert_eq!(*finish_reason, FinishReason::Stop);
    assert_eq!(agent.status(), RunState::Idle);
}

/// spec §8 Scenario 5, literally: "After 5 assistant deltas the consumer
/// calls abort()" — not before `run` is even called. Chunks are delivered
/// over a channel the test drives directly so `abort()` genuinely lands
/// mid-stream.
#[tokio::test]
async fn abort_mid_stream_yields_single_abort_event() {
    let client = Arc::new(MockModelClient::new());
    let tx = client.queue_channel_response();
    let agent = Arc::new(agent(client));

    let run_agent = agent.clone();
    let handle = tokio::spawn(async move { run_agent.run("Hi").await });

    for i in 0..5 {
        tx.send(Ok(agentkit_llm::ChatChunk {
            choices: vec![agentkit_llm::message::ChatChoiceDelta {
                delta: agentkit_llm::message::ChatDelta { content: Some(format!("chunk{i} ")), ..Default::default() },
                finish_reason: None,
            }],
            usage: None,
        }))
        .unwrap();
        tokio::task::yield_now().await;
    }

    assert!(agent.abort());
    drop(tx);

    let outcome = handle.await.unwrap().unwrap();
    let RunOutcome::Final(event) = outcome else { panic!("expected Final") };
    let EventPayload::AssistantMessage { content, finish_reason, .. } = &event.payload else { panic!("expected assistant_message") };
    assert_eq!(content, "Request was aborted");
    assert_eq!(*finish_reason, FinishReason::Abort);
    assert_eq!(agent.status(), RunState::Aborted);

    let events = agent.get_event_stream().get_events();
    let assistant_messages = events.iter().filter(|e| e.type_name() == "assistant_message").count();
    assert_eq!(assistant_messages, 1, "exactly one assistant_message may land in the log for an aborted run");
    assert!(
        events.iter().any(|e| e.type_name() == "assistant_streaming_message"),
        "deltas sent before abort() was called should still have been observed"
    );
}

#[tokio::test]
async fn max_iterations_scenario() {
    let client = Arc::new(MockModelClient::new());
    for _ in 0..5 {
        client.queue_tool_call("call_x", "echo", r#"{"message":"go"}"#);
    }
    let mut config = AgentConfig::for_profile("");
    config.max_iterations = 3;
    let agent = Agent::builder("You are helpful.").config(config).client(client).build();
    agent.register_tool(Arc::new(EchoTool));

    let outcome = agent.run("loop forever").await.unwrap();
    let RunOutcome::Final(event) = outcome else { panic!("expected Final") };
    let EventPayload::AssistantMessage { finish_reason, .. } = &event.payload else { panic!("expected assistant_message") };
    assert_eq!(*finish_reason, FinishReason::MaxIterations);

    let events = agent.get_event_stream().get_events();
    let tool_call_count = events.iter().filter(|e| e.type_name() == "tool_call").count();
    assert_eq!(tool_call_count, 3);
    assert!(events.iter().any(|e| e.type_name() == "system"));
}

#[tokio::test]
async fn dispose_then_run_fails() {
    let client = Arc::new(MockModelClient::new());
    client.queue_text("unused");
    let agent = agent(client);
    agent.dispose();
    agent.dispose(); // idempotent

    let err = agent.run("Hi").await.unwrap_err();
    assert!(matches!(err, KernelError::Disposed));
}

#[tokio::test]
async fn streaming_run_returns_every_event_for_this_run() {
    let client = Arc::new(MockModelClient::new());
    client.queue_text("Hello, world");
    let agent = agent(client);

    let outcome = agent.run(RunInput::from("Hi").stream(true)).await.unwrap();
    let RunOutcome::Stream(events) = outcome else { panic!("expected Stream") };
    assert_eq!(events.first().unwrap().type_name(), "user_message");
    assert_eq!(events.last().unwrap().type_name(), "assistant_message");
}

//! End-to-end tests for `ChatClient` over in-process connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use ai_stack::chunk::{ChunkStrategy, WordBoundaryStrategy};
use ai_stack::client::{
    ChatClient, ChatClientOptions, ChatState, ConnectRequest, LoopConnection, StreamConnection,
};
use ai_stack::message::{ToolCallPart, ToolCallState, ToolResultState};
use ai_stack::mock::MockProvider;
use ai_stack::test_helpers::{content, error_event, mock_for, text_turn, tool_turn};
use ai_stack::tool::{AgentLoopConfig, ToolError, ToolRegistry, max_iterations, tool_fn};
use ai_stack::{
    ChatRole, ChatStream, DynProvider, JsonSchema, LlmError, MessagePart, StreamEvent,
    ToolDefinition, UiMessage,
};

fn object_schema() -> JsonSchema {
    JsonSchema::new(json!({"type": "object"}))
}

fn loop_client(mock: &Arc<MockProvider>, registry: ToolRegistry, options: ChatClientOptions) -> ChatClient {
    let provider: Arc<dyn DynProvider> = Arc::clone(mock) as Arc<dyn DynProvider>;
    let connection = LoopConnection::new(provider, Arc::new(registry));
    ChatClient::new(Arc::new(connection), options)
}

/// Streams `events`, then stays open until cancelled.
fn hanging_connection(events: Vec<StreamEvent>) -> StreamConnection {
    StreamConnection::new(move |_request, _cancel| {
        let events = events.clone();
        async move {
            let stream = futures::stream::iter(events.into_iter().map(Ok::<_, LlmError>))
                .chain(futures::stream::pending());
            Ok(Box::pin(stream) as ChatStream)
        }
    })
}

fn fixed_connection(events: Vec<StreamEvent>) -> StreamConnection {
    StreamConnection::new(move |_request, _cancel| {
        let stream = futures::stream::iter(events.clone().into_iter().map(Ok::<_, LlmError>));
        async move { Ok(Box::pin(stream) as ChatStream) }
    })
}

async fn wait_until(client: &ChatClient, condition: impl Fn(&ChatState) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition(&client.get_state()) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn tool_calls(message: &UiMessage) -> Vec<&ToolCallPart> {
    message
        .parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::ToolCall(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn last(client: &ChatClient) -> UiMessage {
    client.messages().pop().expect("conversation should not be empty")
}

#[tokio::test]
async fn test_send_message_streams_reply() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(text_turn("Hello!"));

    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finished);
    let client = loop_client(
        &mock,
        ToolRegistry::new(),
        ChatClientOptions {
            on_finish: Some(Arc::new(move |msg: &UiMessage| {
                sink.lock().unwrap().push(msg.text());
            })),
            ..Default::default()
        },
    );

    client.send_message("Hi").await.unwrap();

    let state = client.get_state();
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].role, ChatRole::User);
    assert_eq!(state.messages[0].text(), "Hi");
    assert_eq!(state.messages[1].role, ChatRole::Assistant);
    assert_eq!(state.messages[1].text(), "Hello!");
    assert_eq!(*finished.lock().unwrap(), vec!["Hello!".to_owned()]);
}

#[tokio::test]
async fn test_send_message_trims_input() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(text_turn("Hello!"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    client.send_message("  Hi there \n").await.unwrap();

    assert_eq!(client.messages()[0].text(), "Hi there");
}

#[tokio::test]
async fn test_blank_message_is_ignored() {
    let mock = Arc::new(mock_for("test", "test-model"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    client.send_message("   \n").await.unwrap();

    assert!(client.messages().is_empty());
    assert!(mock.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_initial_messages_and_id() {
    let client = ChatClient::new(
        Arc::new(fixed_connection(Vec::new())),
        ChatClientOptions {
            id: Some("conv-1".into()),
            initial_messages: vec![UiMessage::user("earlier")],
            ..Default::default()
        },
    );
    assert_eq!(client.id(), "conv-1");
    assert_eq!(client.messages().len(), 1);

    let generated = ChatClient::new(Arc::new(fixed_connection(Vec::new())), ChatClientOptions::default());
    assert!(generated.id().starts_with("chat-"));
}

#[tokio::test]
async fn test_request_carries_history_body_and_id() {
    let seen: Arc<Mutex<Option<ConnectRequest>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen);
    let connection = StreamConnection::new(move |request, _cancel| {
        *capture.lock().unwrap() = Some(request);
        let stream = futures::stream::iter(vec![Ok::<_, LlmError>(content("ok"))]);
        async move { Ok(Box::pin(stream) as ChatStream) }
    });
    let client = ChatClient::new(
        Arc::new(connection),
        ChatClientOptions {
            id: Some("conv-1".into()),
            body: HashMap::from([("model".to_owned(), json!("small"))]),
            ..Default::default()
        },
    );

    client.send_message("Hi").await.unwrap();

    let request = seen.lock().unwrap().take().unwrap();
    assert_eq!(request.conversation_id, "conv-1");
    assert_eq!(request.body["model"], json!("small"));
    // The assistant placeholder is not part of the request.
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].text(), "Hi");

    let wire = serde_json::to_value(&request).unwrap();
    assert_eq!(wire["conversationId"], "conv-1");
    assert_eq!(wire["data"]["model"], "small");
    assert_eq!(request.iterations, 0);
    assert_eq!(wire["iterations"], 0);
}

#[tokio::test]
async fn test_send_while_loading_is_busy() {
    let client = ChatClient::new(
        Arc::new(hanging_connection(vec![content("partial")])),
        ChatClientOptions::default(),
    );

    let background = client.clone();
    let first = tokio::spawn(async move { background.send_message("first").await });
    wait_until(&client, |s| s.messages.last().is_some_and(|m| m.text() == "partial")).await;

    let err = client.send_message("second").await.unwrap_err();
    assert!(matches!(*err, LlmError::Busy));
    assert_eq!(client.messages().len(), 2);

    let err = client.reload().await.unwrap_err();
    assert!(matches!(*err, LlmError::Busy));

    client.stop();
    first.await.unwrap().unwrap();

    let state = client.get_state();
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].text(), "partial");
}

#[tokio::test]
async fn test_stream_error_sets_error_and_keeps_partial_text() {
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let client = ChatClient::new(
        Arc::new(fixed_connection(vec![content("par"), error_event("boom")])),
        ChatClientOptions {
            on_error: Some(Arc::new(move |_err: &LlmError| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        },
    );

    let err = client.send_message("Hi").await.unwrap_err();
    assert!(err.to_string().contains("boom"));

    let state = client.get_state();
    assert!(!state.is_loading);
    assert!(state.error.is_some());
    assert_eq!(state.messages[1].text(), "par");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_failure_keeps_placeholder() {
    let connection = StreamConnection::new(|_request, _cancel| async {
        Err::<ChatStream, _>(LlmError::Auth("bad key".into()))
    });
    let client = ChatClient::new(Arc::new(connection), ChatClientOptions::default());

    let err = client.send_message("Hi").await.unwrap_err();
    assert!(matches!(*err, LlmError::Auth(_)));

    let state = client.get_state();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].role, ChatRole::Assistant);
    assert!(state.messages[1].parts.is_empty());
}

#[tokio::test]
async fn test_next_run_clears_error() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(vec![error_event("first failed")]);
    mock.queue_stream(text_turn("recovered"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    assert!(client.send_message("one").await.is_err());
    assert!(client.error().is_some());

    client.send_message("two").await.unwrap();
    assert!(client.error().is_none());
    assert_eq!(last(&client).text(), "recovered");
}

#[tokio::test]
async fn test_reload_replaces_last_reply() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(text_turn("first"));
    mock.queue_stream(text_turn("second"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    client.send_message("Hi").await.unwrap();
    client.reload().await.unwrap();

    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text(), "second");
    assert_eq!(mock.recorded_calls()[1].messages.len(), 1);
}

#[tokio::test]
async fn test_reload_without_user_message_is_noop() {
    let mock = Arc::new(mock_for("test", "test-model"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    client.reload().await.unwrap();

    assert!(client.messages().is_empty());
    assert!(!client.is_loading());
    assert!(mock.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_reload_then_stop_leaves_user_and_placeholder() {
    let client = ChatClient::new(
        Arc::new(hanging_connection(Vec::new())),
        ChatClientOptions {
            initial_messages: vec![
                UiMessage::user("question"),
                UiMessage::new(
                    ChatRole::Assistant,
                    vec![MessagePart::Text {
                        content: "old answer".into(),
                    }],
                ),
            ],
            ..Default::default()
        },
    );

    let background = client.clone();
    let run = tokio::spawn(async move { background.reload().await });
    wait_until(&client, |s| s.is_loading).await;
    client.stop();
    run.await.unwrap().unwrap();

    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text(), "question");
    assert_eq!(messages[1].role, ChatRole::Assistant);
    assert!(messages[1].parts.is_empty());
}

#[tokio::test]
async fn test_clear_stops_and_empties() {
    let client = ChatClient::new(
        Arc::new(hanging_connection(vec![content("partial")])),
        ChatClientOptions::default(),
    );

    let background = client.clone();
    let run = tokio::spawn(async move { background.send_message("Hi").await });
    wait_until(&client, |s| s.messages.len() == 2).await;
    client.clear();
    run.await.unwrap().unwrap();

    let state = client.get_state();
    assert!(state.messages.is_empty());
    assert!(!state.is_loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_append_and_set_messages_do_not_run() {
    let mock = Arc::new(mock_for("test", "test-model"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    client.append(UiMessage::user("a"));
    client.append(UiMessage::user("b"));
    assert_eq!(client.messages().len(), 2);

    client.set_messages(vec![UiMessage::user("c")]);
    assert_eq!(client.messages()[0].text(), "c");
    assert!(mock.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_subscribers_see_loading_transitions() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(text_turn("Hello"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = client.subscribe(move |state| sink.lock().unwrap().push(state.is_loading));

    client.send_message("Hi").await.unwrap();

    let loading = seen.lock().unwrap().clone();
    assert_eq!(loading.first(), Some(&true));
    assert_eq!(loading.last(), Some(&false));

    assert!(client.unsubscribe(id));
    assert!(!client.unsubscribe(id));
    let before = seen.lock().unwrap().len();
    client.append(UiMessage::user("quiet"));
    assert_eq!(seen.lock().unwrap().len(), before);
}

#[tokio::test]
async fn test_subscriber_may_read_client_state() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(text_turn("Hello"));
    let client = loop_client(&mock, ToolRegistry::new(), ChatClientOptions::default());

    let reader = client.clone();
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);
    client.subscribe(move |_state| {
        let _ = reader.get_state();
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.send_message("Hi").await.unwrap();
    assert!(reads.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_on_chunk_and_chunk_strategy() {
    let chunks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&chunks);
    let client = ChatClient::new(
        Arc::new(fixed_connection(vec![
            content("Hel"),
            content("lo wor"),
            content("ld"),
        ])),
        ChatClientOptions {
            chunk_strategy: Some(Arc::new(|| Box::new(WordBoundaryStrategy) as Box<dyn ChunkStrategy>)),
            on_chunk: Some(Arc::new(move |_event: &StreamEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        },
    );

    client.send_message("Hi").await.unwrap();

    assert_eq!(chunks.load(Ordering::SeqCst), 3);
    assert_eq!(last(&client).text(), "Hello world");
}

#[tokio::test]
async fn test_server_tool_round_renders_parts_in_order() {
    let mock = Arc::new(mock_for("test", "test-model"));
    let mut first = vec![content("Let me check. ")];
    first.extend(tool_turn(&[("c1", "lookup", r#"{"q":"rust"}"#)]));
    mock.queue_stream(first);
    mock.queue_stream(text_turn("Found it."));

    let mut registry = ToolRegistry::new();
    registry.register(tool_fn(
        ToolDefinition::new("lookup", "Look something up", object_schema()),
        |_input: Value| async move { Ok::<_, ai_stack::tool::ToolError>("result text") },
    ));
    let client = loop_client(&mock, registry, ChatClientOptions::default());

    client.send_message("Search").await.unwrap();

    let message = last(&client);
    let kinds: Vec<&str> = message
        .parts
        .iter()
        .map(|p| match p {
            MessagePart::Text { .. } => "text",
            MessagePart::Thinking { .. } => "thinking",
            MessagePart::ToolCall(_) => "tool_call",
            MessagePart::ToolResult(_) => "tool_result",
        })
        .collect();
    assert_eq!(kinds, vec!["text", "tool_call", "tool_result", "text"]);
    assert_eq!(tool_calls(&message)[0].state, ToolCallState::OutputAvailable);
    assert_eq!(message.text(), "Let me check. Found it.");
}

#[tokio::test]
async fn test_approval_denied_then_resumes() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(tool_turn(&[("c1", "delete_file", r#"{"path":"a.txt"}"#)]));
    mock.queue_stream(text_turn("Okay, I left it alone."));

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    let mut registry = ToolRegistry::new();
    registry.register(tool_fn(
        ToolDefinition::new("delete_file", "Delete a file", object_schema()).with_approval(),
        move |_input: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, ai_stack::tool::ToolError>("deleted") }
        },
    ));
    let client = loop_client(&mock, registry, ChatClientOptions::default());

    client.send_message("Delete a.txt").await.unwrap();

    let waiting = last(&client);
    let call = tool_calls(&waiting)[0].clone();
    assert_eq!(call.state, ToolCallState::ApprovalRequested);
    let approval = call.approval.clone().unwrap();
    assert_eq!(approval.id, "approval_c1");
    assert_eq!(approval.approved, None);
    assert!(!client.is_loading());

    client
        .add_tool_approval_response(&approval.id, false)
        .await
        .unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 0);
    let messages = client.messages();
    assert_eq!(messages.len(), 3);
    let decided = tool_calls(&messages[1])[0];
    assert_eq!(decided.state, ToolCallState::ApprovalResponded);
    assert_eq!(decided.approval.as_ref().unwrap().approved, Some(false));

    let resumed = &messages[2];
    assert!(resumed.parts.iter().any(|p| matches!(
        p,
        MessagePart::ToolResult(r) if r.state == ToolResultState::Error
            && r.content.contains("denied")
    )));
    assert_eq!(resumed.text(), "Okay, I left it alone.");
}

#[tokio::test]
async fn test_unknown_approval_id_is_rejected() {
    let client = ChatClient::new(Arc::new(fixed_connection(Vec::new())), ChatClientOptions::default());
    let err = client.add_tool_approval_response("approval_nope", true).await.unwrap_err();
    assert!(matches!(*err, LlmError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_manual_client_tool_result_resumes() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(tool_turn(&[("c1", "confirm", "{}")]));
    mock.queue_stream(text_turn("Thanks for confirming."));

    let mut registry = ToolRegistry::new();
    registry.register_client(ToolDefinition::new("confirm", "Ask the user", object_schema()));
    let client = loop_client(&mock, registry, ChatClientOptions::default());

    client.send_message("Go").await.unwrap();
    assert_eq!(mock.recorded_calls().len(), 1);
    assert_eq!(client.messages().len(), 2);

    let err = client
        .add_tool_result("c1", json!(null), ToolResultState::Streaming)
        .await
        .unwrap_err();
    assert!(matches!(*err, LlmError::InvalidRequest(_)));

    client
        .add_tool_result("c1", json!({"ok": true}), ToolResultState::Complete)
        .await
        .unwrap();

    let calls = mock.recorded_calls();
    assert_eq!(calls.len(), 2);
    let tool_message = calls[1]
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::Tool)
        .unwrap();
    assert_eq!(tool_message.tool_results()[0].content, r#"{"ok":true}"#);

    let messages = client.messages();
    assert_eq!(tool_calls(&messages[1])[0].state, ToolCallState::OutputAvailable);
    assert_eq!(messages[2].text(), "Thanks for confirming.");
}

#[tokio::test]
async fn test_client_tools_execute_automatically() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(tool_turn(&[("c1", "get_location", "{}")]));
    mock.queue_stream(text_turn("It is sunny in Paris."));

    let mut server = ToolRegistry::new();
    server.register_client(ToolDefinition::new("get_location", "Where the user is", object_schema()));

    let mut local = ToolRegistry::new();
    local.register(tool_fn(
        ToolDefinition::new("get_location", "Where the user is", object_schema()),
        |_input: Value| async move { Ok::<_, ai_stack::tool::ToolError>("Paris") },
    ));
    let client = loop_client(
        &mock,
        server,
        ChatClientOptions {
            tools: Some(Arc::new(local)),
            ..Default::default()
        },
    );

    client.send_message("Weather?").await.unwrap();

    let messages = client.messages();
    assert_eq!(messages.len(), 3);
    let call = tool_calls(&messages[1])[0];
    assert_eq!(call.output, Some(json!("Paris")));
    assert_eq!(call.state, ToolCallState::OutputAvailable);
    assert_eq!(messages[2].text(), "It is sunny in Paris.");

    let calls = mock.recorded_calls();
    let result = calls[1]
        .messages
        .iter()
        .flat_map(|m| m.tool_results())
        .next()
        .unwrap();
    assert_eq!(result.content, "Paris");
    assert!(!client.is_loading());
}

/// A server registry that leaves `get_location` to the client, and a
/// local registry that answers it after `delay`.
fn location_tools(delay: Duration) -> (ToolRegistry, ToolRegistry) {
    let mut server = ToolRegistry::new();
    server.register_client(ToolDefinition::new("get_location", "Where the user is", object_schema()));

    let mut local = ToolRegistry::new();
    local.register(tool_fn(
        ToolDefinition::new("get_location", "Where the user is", object_schema()),
        move |_input: Value| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, ToolError>("Paris")
        },
    ));
    (server, local)
}

#[tokio::test]
async fn test_client_tool_continuations_share_iteration_budget() {
    let mock = Arc::new(mock_for("test", "test-model"));
    for i in 0..6 {
        mock.queue_stream(tool_turn(&[(&format!("c{i}"), "get_location", "{}")]));
    }
    let (server, local) = location_tools(Duration::ZERO);
    let connection = LoopConnection::new(Arc::clone(&mock) as Arc<dyn DynProvider>, Arc::new(server))
        .with_config(AgentLoopConfig {
            strategy: max_iterations(2),
            ..Default::default()
        });
    let client = ChatClient::new(
        Arc::new(connection),
        ChatClientOptions {
            tools: Some(Arc::new(local)),
            ..Default::default()
        },
    );

    client.send_message("Where am I?").await.unwrap();

    assert_eq!(mock.recorded_calls().len(), 2);
    assert_eq!(mock.remaining(), 4);
    assert!(!client.is_loading());
    assert!(client.error().is_none());
    // The second call's output still reaches the history.
    assert!(last(&client).has_tool_result("c1"));
}

#[tokio::test]
async fn test_stop_during_client_tool_prevents_next_turn() {
    let mock = Arc::new(mock_for("test", "test-model"));
    mock.queue_stream(tool_turn(&[("c1", "get_location", "{}")]));
    mock.queue_stream(text_turn("never"));
    let (server, local) = location_tools(Duration::from_millis(300));
    let client = loop_client(
        &mock,
        server,
        ChatClientOptions {
            tools: Some(Arc::new(local)),
            ..Default::default()
        },
    );

    let running = client.clone();
    let send = tokio::spawn(async move { running.send_message("Where am I?").await });
    wait_until(&client, |state| {
        state.messages.last().is_some_and(|m| {
            m.parts.iter().any(|p| {
                matches!(p, MessagePart::ToolCall(part) if part.state == ToolCallState::InputComplete)
            })
        })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.is_loading());

    client.stop();
    send.await.unwrap().unwrap();
    assert!(!client.is_loading());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(mock.recorded_calls().len(), 1);
    assert_eq!(mock.remaining(), 1);
    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(tool_calls(&messages[1])[0].output, None);
}

mod common;

use choreruntime::{FlowRuntime, RuntimeConfig};
use common::{node, request, runtime, MockHost};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(10);

fn endpoint(outputs: &[(&str, &str, &str)]) -> serde_json::Value {
    node("endpoint", json!({"endpoint": "e1"}), &[], 1, outputs)
}

#[tokio::test]
async fn script_result_becomes_the_response() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1")]),
        "2": node(
            "script",
            json!({"script": "function main(a) { return a + \"-x\"; }"}),
            &[("input_1", "1", "output_1")],
            3,
            &[("output_2", "3", "input_1")],
        ),
        "3": node("respond", json!({}), &[("input_1", "2", "output_2")], 0, &[]),
    });

    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime
        .start_flow(request(&graph).with_payload("hi"))
        .await
        .unwrap();

    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .expect("a response");
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "hi-x");
    assert!(handle.wait().await.is_empty());
}

#[tokio::test]
async fn only_the_first_loop_branch_responds() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1")]),
        "2": node(
            "forLoop",
            json!({"for": "return [1, 2, 3]"}),
            &[("input_1", "1", "output_1")],
            1,
            &[("output_1", "3", "input_1")],
        ),
        "3": node("respond", json!({}), &[("input_1", "2", "output_1")], 0, &[]),
    });

    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime.start_flow(request(&graph)).await.unwrap();
    let mut rx = handle.take_response_channel().expect("response channel");

    let first = tokio::time::timeout(LIMIT, rx.recv()).await.unwrap().unwrap();
    assert!(["1", "2", "3"].contains(&first.text().as_str()));

    // The channel closes after the single response.
    assert!(tokio::time::timeout(LIMIT, rx.recv()).await.unwrap().is_none());
    assert!(handle.wait().await.is_empty());
}

#[tokio::test]
async fn fan_in_script_runs_once_with_every_input() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1"), ("output_1", "3", "input_1")]),
        "2": node(
            "script",
            json!({"script": "function main(a) { return a + '1'; }"}),
            &[("input_1", "1", "output_1")],
            3,
            &[("output_2", "4", "input_1")],
        ),
        "3": node(
            "script",
            json!({"script": "function main(a) { return a + '2'; }"}),
            &[("input_1", "1", "output_1")],
            3,
            &[("output_2", "4", "input_2")],
        ),
        "4": node(
            "script",
            json!({"script": "function main(a, b) { return a + b; }"}),
            &[("input_1", "2", "output_2"), ("input_2", "3", "output_2")],
            3,
            &[("output_2", "5", "input_1")],
        ),
        "5": node("respond", json!({}), &[("input_1", "4", "output_2")], 0, &[]),
    });

    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime
        .start_flow(request(&graph).with_payload("x"))
        .await
        .unwrap();

    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.text(), "x1x2");
}

#[tokio::test]
async fn shared_nodes_are_fetched_once() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1"), ("output_1", "3", "input_1")]),
        "2": node(
            "hub",
            json!({}),
            &[("input_1", "1", "output_1")],
            1,
            &[("output_1", "4", "input_1")]
        ),
        "3": node(
            "hub",
            json!({}),
            &[("input_1", "1", "output_1")],
            1,
            &[("output_1", "4", "input_1")]
        ),
        "4": node(
            "template",
            json!({"template": "greet"}),
            &[("input_1", "2", "output_1"), ("input_1", "3", "output_1")],
            1,
            &[("output_1", "5", "input_1")],
        ),
        "5": node("respond", json!({}), &[("input_1", "4", "output_1")], 0, &[]),
    });

    let (runtime, host) = runtime(MockHost::new().with_template("greet", "Hello {{ name }}!"));
    let mut handle = runtime
        .start_flow(request(&graph).with_payload(r#"{"name": "Ada"}"#))
        .await
        .unwrap();

    assert_eq!(host.lookup_count(), 1);

    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.text(), "Hello Ada!");
}

#[tokio::test]
async fn unsignalled_wait_does_not_hang() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1"), ("output_1", "3", "input_1")]),
        "2": node(
            "wait",
            json!({}),
            &[("input_1", "1", "output_1"), ("input_2", "3", "output_2")],
            1,
            &[("output_1", "4", "input_1")],
        ),
        "3": node(
            "ifCase",
            json!({"if": "false"}),
            &[("input_1", "1", "output_1")],
            2,
            &[("output_2", "2", "input_2")],
        ),
        "4": node("respond", json!({}), &[("input_1", "2", "output_1")], 0, &[]),
    });

    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime.start_flow(request(&graph)).await.unwrap();

    let response = tokio::time::timeout(LIMIT, handle.response()).await.unwrap();
    assert!(response.is_none());
    assert!(handle.wait().await.is_empty());
}

/// Entry feeds `gated` on `trigger` and a long-sleeping script whose result
/// would feed `gated` on `signal`.
fn parked_behind_sleeper(
    gated: &str,
    data: serde_json::Value,
    trigger: &str,
    signal: &str,
    output: &str,
) -> serde_json::Value {
    json!({
        "1": endpoint(&[("output_1", "2", trigger), ("output_1", "3", "input_1")]),
        "2": node(
            gated,
            data,
            &[(trigger, "1", "output_1"), (signal, "3", "output_2")],
            3,
            &[(output, "4", "input_1")],
        ),
        "3": node(
            "script",
            json!({"script": "function main(a) { sleep('1h'); return 'late'; }"}),
            &[("input_1", "1", "output_1")],
            3,
            &[("output_2", "2", signal)],
        ),
        "4": node("respond", json!({}), &[("input_1", "2", output)], 0, &[]),
    })
}

#[tokio::test]
async fn canceling_the_request_releases_a_parked_wait() {
    let graph = parked_behind_sleeper("wait", json!({}), "input_1", "input_2", "output_1");

    let cancel = CancellationToken::new();
    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime
        .start_flow(request(&graph).with_cancel(cancel.clone()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let response = tokio::time::timeout(LIMIT, handle.response()).await.unwrap();
    assert!(response.is_none());

    let errors = tokio::time::timeout(LIMIT, handle.wait()).await.unwrap();
    assert!(errors.is_empty(), "{:?}", errors);
}

#[tokio::test]
async fn parked_request_gives_up_after_the_stall_timeout() {
    // Request reads its template values from input_1; input_2 triggers it.
    let graph = parked_behind_sleeper(
        "request",
        json!({"url": "http://api.local/{{ path }}"}),
        "input_2",
        "input_1",
        "output_3",
    );

    let host = Arc::new(MockHost::new());
    let config = RuntimeConfig {
        stall_timeout_ms: Some(50),
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_config(
        Arc::new(chorenodes::standard_registry()),
        host.clone(),
        config,
    );
    let handle = runtime.start_flow(request(&graph)).await.unwrap();

    let errors = tokio::time::timeout(LIMIT, async {
        loop {
            let errors = handle.errors();
            if !errors.is_empty() {
                return errors;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Stall detected, node 2"), "{}", errors[0]);
    assert!(host.http_requests().is_empty());

    handle.cancel();
    let errors = tokio::time::timeout(LIMIT, handle.wait()).await.unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn accepted_fallback_answers_unclaimed_runs() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1")]),
        "2": node(
            "ifCase",
            json!({"if": "false"}),
            &[("input_1", "1", "output_1")],
            2,
            &[("output_2", "3", "input_1")],
        ),
        "3": node("respond", json!({}), &[("input_1", "2", "output_2")], 0, &[]),
    });

    let registry = Arc::new(chorenodes::standard_registry());
    let config = RuntimeConfig {
        accepted_fallback: true,
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_config(registry, Arc::new(MockHost::new()), config);

    let mut handle = runtime.start_flow(request(&graph)).await.unwrap();
    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(response.text(), "Accepted");
}

#[tokio::test]
async fn wait_is_released_by_a_sibling_branch() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1"), ("output_1", "3", "input_1")]),
        "2": node(
            "wait",
            json!({}),
            &[("input_1", "1", "output_1"), ("input_2", "3", "output_2")],
            1,
            &[("output_1", "4", "input_1")],
        ),
        "3": node(
            "script",
            json!({"script": "function main(a) { return 'signal'; }"}),
            &[("input_1", "1", "output_1")],
            3,
            &[("output_2", "2", "input_2")],
        ),
        "4": node("respond", json!({}), &[("input_1", "2", "output_1")], 0, &[]),
    });

    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime
        .start_flow(request(&graph).with_payload("payload"))
        .await
        .unwrap();

    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.text(), "payload");
}

#[tokio::test]
async fn tags_disable_other_paths() {
    let graph = json!({
        "1": node(
            "endpoint",
            json!({"endpoint": "e1", "tags": "blue"}),
            &[],
            1,
            &[("output_1", "2", "input_1"), ("output_1", "3", "input_1")],
        ),
        "2": node(
            "hub",
            json!({"tags": "red"}),
            &[("input_1", "1", "output_1")],
            1,
            &[("output_1", "4", "input_1")],
        ),
        "3": node(
            "hub",
            json!({"tags": "blue, green"}),
            &[("input_1", "1", "output_1")],
            1,
            &[("output_1", "5", "input_1")],
        ),
        "4": node("respond", json!({"status": 500}), &[("input_1", "2", "output_1")], 0, &[]),
        "5": node("respond", json!({"status": 200}), &[("input_1", "3", "output_1")], 0, &[]),
    });

    let (runtime, _host) = runtime(MockHost::new());
    let mut handle = runtime.start_flow(request(&graph)).await.unwrap();

    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn control_runs_a_nested_flow() {
    let child = json!({
        "1": node(
            "endpoint",
            json!({"endpoint": "inner"}),
            &[],
            1,
            &[("output_1", "2", "input_1")],
        ),
        "2": node(
            "script",
            json!({"script": "function main(a) { return a + '!'; }"}),
            &[("input_1", "1", "output_1")],
            3,
            &[("output_2", "3", "input_1")],
        ),
        "3": node("respond", json!({"status": "201"}), &[("input_1", "2", "output_2")], 0, &[]),
    });
    let silent = json!({
        "1": node("endpoint", json!({"endpoint": "inner"}), &[], 1, &[]),
    });

    let parent = |control: &str| {
        json!({
            "1": endpoint(&[("output_1", "2", "input_1")]),
            "2": node(
                "control",
                json!({"control": control, "endpoint": "inner"}),
                &[("input_1", "1", "output_1")],
                1,
                &[("output_1", "3", "input_1")],
            ),
            "3": node("respond", json!({"get": true}), &[("input_1", "2", "output_1")], 0, &[]),
        })
    };

    let (runtime, _host) = runtime(
        MockHost::new()
            .with_control("child", child)
            .with_control("silent", silent),
    );

    let mut handle = runtime
        .start_flow(request(&parent("child")).with_payload("hi"))
        .await
        .unwrap();
    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.text(), "hi!");

    // Without a nested response the incoming payload is forwarded.
    let mut handle = runtime
        .start_flow(request(&parent("silent")).with_payload("hi"))
        .await
        .unwrap();
    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "hi");
}

#[tokio::test]
async fn request_response_is_forwarded_by_respond() {
    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_2")]),
        "2": node(
            "request",
            json!({"url": "http://api.local/echo", "method": "PUT"}),
            &[("input_2", "1", "output_1")],
            3,
            &[("output_2", "3", "input_1")],
        ),
        "3": node("respond", json!({"get": true}), &[("input_1", "2", "output_2")], 0, &[]),
    });

    let (runtime, host) = runtime(MockHost::new());
    let mut handle = runtime
        .start_flow(request(&graph).with_payload("ping"))
        .await
        .unwrap();

    let response = tokio::time::timeout(LIMIT, handle.response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.text(), "ping");
    assert_eq!(response.headers["content-type"], "text/plain");
    assert_eq!(host.http_requests()[0].method, "PUT");
}

#[tokio::test]
async fn flow_start_failures_are_reported() {
    let (runtime, _host) = runtime(MockHost::new());

    let graph = json!({
        "1": endpoint(&[("output_1", "2", "input_1")]),
        "2": node("template", json!({}), &[("input_1", "1", "output_1")], 1, &[]),
    });

    let missing = runtime
        .start_flow(common::request(&graph).with_method("GET"))
        .await;
    assert!(matches!(missing, Err(chorecore::FlowError::Fetch { .. })));

    let other = choreruntime::FlowRequest::new("test", "nope", graph.to_string());
    let err = runtime.start_flow(other).await.err().expect("no entry node");
    assert!(err.is_not_found());

    let garbage = choreruntime::FlowRequest::new("test", "e1", "not json");
    let err = runtime.start_flow(garbage).await.err().expect("parse failure");
    assert!(matches!(err, chorecore::FlowError::Parse(_)));
}

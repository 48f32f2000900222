use lodestar_core::mcp::{handle_line, handle_request, McpState};
use std::sync::Arc;

const FLAG_WAT: &str = r#"
(module
  (global $flag (export "flag") (mut i32) (i32.const 0))
  (global $h (export "h") (mut i32) (i32.const 0))

  (func (export "doStuff") (param $data i32)
    (if (i32.eq (global.get $h) (i32.const 5678))
      (then (global.set $flag (i32.const 1))))
    (global.set $h (local.get $data)))

  (func (export "invariant_flag_is_zero") (result i32)
    (i32.eqz (global.get $flag)))
)
"#;

fn make_state() -> Arc<McpState> {
    Arc::new(McpState::new())
}

fn make_request(method: &str, params: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    })
}

fn call_tool(state: &McpState, name: &str, arguments: serde_json::Value) -> serde_json::Value {
    let req = make_request(
        "tools/call",
        serde_json::json!({ "name": name, "arguments": arguments }),
    );
    handle_request(&req, state)
}

fn parse_tool_response(resp: &serde_json::Value) -> serde_json::Value {
    let content = &resp["result"]["content"][0];
    serde_json::from_str(content["text"].as_str().unwrap()).unwrap()
}

fn load_flag(state: &McpState) -> String {
    let resp = call_tool(
        state,
        "lodestar_load",
        serde_json::json!({
            "module": FLAG_WAT,
            "config": { "worker_count": 2, "seed": 8 }
        }),
    );
    let text = parse_tool_response(&resp);
    assert_eq!(text["result"], "pass", "load failed: {text}");
    text["campaign_id"].as_str().unwrap().to_string()
}

#[test]
fn test_initialize() {
    let state = make_state();
    let req = make_request(
        "initialize",
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "1.0" }
        }),
    );
    let resp = handle_request(&req, &state);
    assert_eq!(resp["jsonrpc"], "2.0");
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["result"]["serverInfo"]["name"], "lodestar");
    assert!(resp["result"]["capabilities"]["tools"].is_object());
}

#[test]
fn test_tools_list() {
    let state = make_state();
    let resp = handle_request(&make_request("tools/list", serde_json::json!({})), &state);
    let tools = resp["result"]["tools"].as_array().unwrap();

    let tool_names: Vec<&str> = tools
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        tool_names,
        vec!["lodestar_load", "lodestar_run", "lodestar_status", "lodestar_abort"]
    );
    for tool in tools {
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
}

#[test]
fn test_load_reports_surface() {
    let state = make_state();
    let resp = call_tool(&state, "lodestar_load", serde_json::json!({ "module": FLAG_WAT }));
    assert!(resp["error"].is_null(), "Unexpected error: {}", resp["error"]);

    let text = parse_tool_response(&resp);
    assert_eq!(text["result"], "pass");
    assert_eq!(text["campaign_id"], "campaign-0001");
    assert_eq!(text["operations"], serde_json::json!(["doStuff"]));
    assert_eq!(text["invariants"], serde_json::json!(["flag_is_zero"]));
}

#[test]
fn test_load_errors() {
    let state = make_state();

    let text = parse_tool_response(&call_tool(&state, "lodestar_load", serde_json::json!({})));
    assert_eq!(text["result"], "errors");
    assert!(text["errors"][0].as_str().unwrap().contains("module"));

    let text = parse_tool_response(&call_tool(
        &state,
        "lodestar_load",
        serde_json::json!({ "module": FLAG_WAT, "invariants": ["balance_ok"] }),
    ));
    assert_eq!(text["result"], "errors");
    assert!(text["errors"][0].as_str().unwrap().contains("balance_ok"));

    let text = parse_tool_response(&call_tool(
        &state,
        "lodestar_load",
        serde_json::json!({ "module": FLAG_WAT, "config": { "max_sequence_length": 0 } }),
    ));
    assert_eq!(text["result"], "errors");
}

#[test]
fn test_run_and_wait_returns_counterexample() {
    let state = make_state();
    let id = load_flag(&state);

    let resp = call_tool(&state, "lodestar_run", serde_json::json!({ "campaign_id": id }));
    let status = parse_tool_response(&resp);
    assert_eq!(status["phase"], "failed");
    assert_eq!(status["report"]["outcome"], "failed");
    let cx = &status["report"]["counterexamples"][0];
    assert_eq!(cx["invariant"], "flag_is_zero");
    assert_eq!(cx["checkpoint"], 2);
    assert_eq!(status["report"]["summary"]["violations_found"], 1);

    // Same campaign again is refused.
    let text = parse_tool_response(&call_tool(
        &state,
        "lodestar_run",
        serde_json::json!({ "campaign_id": id }),
    ));
    assert_eq!(text["result"], "errors");
}

#[test]
fn test_status_engine_and_campaign() {
    let state = make_state();
    let text = parse_tool_response(&call_tool(&state, "lodestar_status", serde_json::json!({})));
    assert_eq!(text["state"], "idle");
    assert_eq!(text["active_campaigns"], 0);

    let id = load_flag(&state);
    let text = parse_tool_response(&call_tool(&state, "lodestar_status", serde_json::json!({})));
    assert_eq!(text["state"], "active");
    assert_eq!(text["active_campaigns"], 1);

    let status = parse_tool_response(&call_tool(
        &state,
        "lodestar_status",
        serde_json::json!({ "campaign_id": id }),
    ));
    assert_eq!(status["phase"], "idle");
    assert_eq!(status["config"]["worker_count"], 2);
    assert!(status["report"].is_null());

    let text = parse_tool_response(&call_tool(
        &state,
        "lodestar_status",
        serde_json::json!({ "campaign_id": "campaign-0404" }),
    ));
    assert_eq!(text["result"], "errors");
}

#[test]
fn test_abort() {
    let state = make_state();
    let id = load_flag(&state);

    let status = parse_tool_response(&call_tool(
        &state,
        "lodestar_abort",
        serde_json::json!({ "campaign_id": id }),
    ));
    assert_eq!(status["phase"], "stopped");

    let text = parse_tool_response(&call_tool(&state, "lodestar_abort", serde_json::json!({})));
    assert_eq!(text["result"], "errors");
    assert!(text["errors"][0].as_str().unwrap().contains("campaign_id"));
}

#[test]
fn test_unknown_tool() {
    let state = make_state();
    let resp = call_tool(&state, "lodestar_teleport", serde_json::json!({}));
    assert_eq!(resp["result"]["isError"], true);
}

#[test]
fn test_unknown_method() {
    let state = make_state();
    let resp = handle_request(&make_request("resources/list", serde_json::json!({})), &state);
    assert_eq!(resp["error"]["code"], -32601);
}

#[test]
fn test_garbage_line_is_parse_error() {
    let state = make_state();
    let resp = handle_line("{this is not json", &state);
    assert_eq!(resp["error"]["code"], -32700);
    assert!(resp["id"].is_null());

    let resp = handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#, &state);
    assert_eq!(resp["id"], 7);
    assert!(resp["result"]["tools"].is_array());
}

use serde_json::{json, Value};

use lodestar_ir::types::InvariantSpec;

use crate::campaign::CampaignError;
use crate::manager::{CampaignManager, CampaignStatus};

/// Server state shared across request handling.
pub struct McpState {
    pub manager: CampaignManager,
}

impl McpState {
    pub fn new() -> Self {
        Self {
            manager: CampaignManager::new(),
        }
    }
}

impl Default for McpState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle one line of input: a JSON-RPC request, or garbage.
pub fn handle_line(line: &str, state: &McpState) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(req) => handle_request(&req, state),
        Err(e) => json_rpc_error(Value::Null, -32700, &format!("Parse error: {e}")),
    }
}

/// Handle a single JSON-RPC request and return a JSON-RPC response.
pub fn handle_request(req: &Value, state: &McpState) -> Value {
    let id = req.get("id").cloned().unwrap_or(Value::Null);
    let method = req.get("method").and_then(|m| m.as_str()).unwrap_or("");

    match method {
        "initialize" => json_rpc_result(id, handle_initialize()),
        "tools/list" => json_rpc_result(id, handle_tools_list()),
        "tools/call" => {
            let params = req.get("params").cloned().unwrap_or(json!({}));
            json_rpc_result(id, handle_tools_call(&params, state))
        }
        _ => json_rpc_error(id, -32601, "Method not found"),
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "serverInfo": {
            "name": "lodestar",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "tools": {}
        }
    })
}

fn handle_tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "lodestar_load",
                "description": "Load a WASM module as a system under test and create an idle fuzzing campaign",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "module": {
                            "type": "string",
                            "description": "WAT text of the module"
                        },
                        "module_path": {
                            "type": "string",
                            "description": "Path to a .wasm or .wat file, used when `module` is absent"
                        },
                        "invariants": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Invariant names to check; defaults to every invariant_* export"
                        },
                        "config": {
                            "type": "object",
                            "description": "Campaign config overrides"
                        }
                    }
                }
            },
            {
                "name": "lodestar_run",
                "description": "Start a loaded campaign, optionally waiting for its report",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "campaign_id": { "type": "string" },
                        "wait": { "type": "boolean", "default": true }
                    },
                    "required": ["campaign_id"]
                }
            },
            {
                "name": "lodestar_status",
                "description": "Status of one campaign, or of the engine when no id is given",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "campaign_id": { "type": "string" }
                    }
                }
            },
            {
                "name": "lodestar_abort",
                "description": "Stop a campaign",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "campaign_id": { "type": "string" }
                    },
                    "required": ["campaign_id"]
                }
            }
        ]
    })
}

fn handle_tools_call(params: &Value, state: &McpState) -> Value {
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let outcome = match tool_name {
        "lodestar_load" => tool_load(&arguments, state),
        "lodestar_run" => tool_run(&arguments, state),
        "lodestar_status" => tool_status(&arguments, state),
        "lodestar_abort" => tool_abort(&arguments, state),
        _ => {
            return json!({
                "isError": true,
                "content": [{
                    "type": "text",
                    "text": json!({"error": format!("Unknown tool: {tool_name}")}).to_string()
                }]
            })
        }
    };
    match outcome {
        Ok(body) => text_content(body),
        Err(e) => text_content(json!({
            "result": "errors",
            "errors": [e.to_string()],
        })),
    }
}

fn tool_load(args: &Value, state: &McpState) -> Result<Value, CampaignError> {
    let module = match (
        args.get("module").and_then(Value::as_str),
        args.get("module_path").and_then(Value::as_str),
    ) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(path)) => std::fs::read(path)
            .map_err(|e| CampaignError::InvalidState(format!("cannot read {path}: {e}")))?,
        (None, None) => {
            return Err(CampaignError::InvalidState(
                "either module or module_path is required".to_string(),
            ))
        }
    };
    let invariants = args.get("invariants").and_then(Value::as_array).map(|names| {
        names
            .iter()
            .filter_map(Value::as_str)
            .map(InvariantSpec::new)
            .collect::<Vec<_>>()
    });
    let config_json = args.get("config").map(Value::to_string);

    let campaign_id = state
        .manager
        .load(&module, invariants, config_json.as_deref())?;
    let status = state.manager.status(&campaign_id)?;
    Ok(json!({
        "result": "pass",
        "campaign_id": campaign_id,
        "operations": status.operations,
        "invariants": status.invariants,
    }))
}

fn tool_run(args: &Value, state: &McpState) -> Result<Value, CampaignError> {
    let id = campaign_id(args)?;
    let wait = args.get("wait").and_then(Value::as_bool).unwrap_or(true);
    state.manager.start(id)?;
    let status = if wait {
        state.manager.wait(id)?
    } else {
        state.manager.status(id)?
    };
    Ok(status_json(&status))
}

fn tool_status(args: &Value, state: &McpState) -> Result<Value, CampaignError> {
    match args.get("campaign_id").and_then(Value::as_str) {
        Some(id) => Ok(status_json(&state.manager.status(id)?)),
        None => {
            let count = state.manager.active_campaign_count();
            let engine_state = if count > 0 { "active" } else { "idle" };
            Ok(json!({
                "state": engine_state,
                "active_campaigns": count,
            }))
        }
    }
}

fn tool_abort(args: &Value, state: &McpState) -> Result<Value, CampaignError> {
    let id = campaign_id(args)?;
    Ok(status_json(&state.manager.abort(id)?))
}

fn campaign_id(args: &Value) -> Result<&str, CampaignError> {
    args.get("campaign_id")
        .and_then(Value::as_str)
        .ok_or_else(|| CampaignError::InvalidState("campaign_id is required".to_string()))
}

fn status_json(status: &CampaignStatus) -> Value {
    serde_json::to_value(status).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn text_content(body: Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": body.to_string()
        }]
    })
}

fn json_rpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn json_rpc_error(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

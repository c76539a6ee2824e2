use crate::jsonrpc::{RpcRequest, RpcResponse};
use crate::tools::{self, QUERY_TOOL, REFRESH_TOOL};
use anyhow::Result;
use serde_json::{json, Value};
use snh48_roster::Roster;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "snh48-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct McpServer {
    roster: Arc<Roster>,
    cache_ttl: Duration,
}

impl McpServer {
    pub fn new(roster: Arc<Roster>, cache_ttl: Duration) -> Self {
        Self { roster, cache_ttl }
    }

    pub fn dispatch(&self, req: &RpcRequest) -> RpcResponse {
        debug!(event = "rpc_dispatch", method = %req.method);
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "notifications/initialized" | "initialized" | "ping" => {
                RpcResponse::success(req.id.clone(), json!({}))
            }
            "tools/list" => {
                RpcResponse::success(req.id.clone(), json!({ "tools": tools::tool_definitions() }))
            }
            "tools/call" => self.handle_tools_call(req),
            _ => {
                warn!(event = "rpc_unknown_method", method = %req.method);
                RpcResponse::method_not_found(req.id.clone(), &req.method)
            }
        }
    }

    fn handle_initialize(&self, req: &RpcRequest) -> RpcResponse {
        if let Some(client) = req.params.get("clientInfo") {
            info!(event = "mcp_initialize", client = %client);
        }
        RpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
            }),
        )
    }

    fn handle_tools_call(&self, req: &RpcRequest) -> RpcResponse {
        let Some(name) = req.params.get("name").and_then(Value::as_str) else {
            return RpcResponse::invalid_params(req.id.clone(), "Missing 'name' parameter");
        };
        let arguments = req.params.get("arguments").cloned().unwrap_or(Value::Null);
        info!(event = "tool_call", tool = name);

        let output = match name {
            QUERY_TOOL => {
                let rows = match arguments.get("sql").and_then(Value::as_str) {
                    Some(sql) => tools::query_members(&self.roster, self.cache_ttl, sql),
                    None => vec![tools::error_row("missing required argument 'sql'")],
                };
                json!({ "result": rows })
            }
            REFRESH_TOOL => json!(tools::refresh_members(&self.roster)),
            other => {
                return RpcResponse::invalid_params(req.id.clone(), format!("Unknown tool: {other}"))
            }
        };
        RpcResponse::success(req.id.clone(), tool_result(output))
    }
}

/// Wraps tool output as MCP content: the pretty JSON text plus the same value
/// as structured content.
fn tool_result(structured: Value) -> Value {
    let text = serde_json::to_string_pretty(&structured).unwrap_or_default();
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured,
        "isError": false
    })
}

/// Newline-delimited JSON-RPC loop. Returns when the reader hits EOF.
pub fn serve<R: BufRead, W: Write>(server: &McpServer, reader: R, mut writer: W) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) if !req.has_valid_version() => {
                warn!(event = "rpc_bad_version", version = %req.jsonrpc);
                if req.is_notification() {
                    continue;
                }
                RpcResponse::invalid_request(req.id)
            }
            Ok(req) => {
                let response = server.dispatch(&req);
                if req.is_notification() {
                    continue;
                }
                response
            }
            Err(err) => {
                warn!(event = "rpc_parse_failed", error = %err);
                RpcResponse::parse_error()
            }
        };

        let payload = serde_json::to_string(&response)?;
        writer.write_all(payload.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    info!(event = "stdin_closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::{roster_in, FlakySource};
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn run(server: &McpServer, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(server, Cursor::new(input.as_bytes()), &mut output).expect("serve");
        String::from_utf8(output)
            .expect("utf8 output")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json response"))
            .collect()
    }

    fn server(dir: &TempDir, source: FlakySource) -> McpServer {
        McpServer::new(Arc::new(roster_in(dir, source)), Duration::from_secs(3600))
    }

    #[test]
    fn handshake_and_tool_listing() {
        let dir = TempDir::new().expect("temp dir");
        let server = server(&dir, FlakySource::default());
        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"clientInfo":{"name":"test"}}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                "\n\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
                "\n"
            ),
        );

        assert_eq!(responses.len(), 2, "notifications get no response");
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!(SERVER_NAME));
        assert_eq!(responses[1]["result"]["tools"][0]["name"], json!(QUERY_TOOL));
        assert_eq!(responses[1]["result"]["tools"][1]["name"], json!(REFRESH_TOOL));
    }

    #[test]
    fn query_tool_call_returns_structured_rows() {
        let dir = TempDir::new().expect("temp dir");
        let server = server(&dir, FlakySource::default());
        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":"q1","method":"tools/call","params":{"name":"query_members_sql","arguments":{"sql":"SELECT sname, height FROM members WHERE gname='SNH'"}}}"#,
                "\n"
            ),
        );

        let result = &responses[0]["result"];
        assert_eq!(responses[0]["id"], json!("q1"));
        assert_eq!(
            result["structuredContent"],
            json!({"result": [{"sname": "刘增艳", "height": "157"}]})
        );
        let text = result["content"][0]["text"].as_str().expect("text content");
        assert_eq!(
            serde_json::from_str::<Value>(text).expect("text is json"),
            result["structuredContent"]
        );
    }

    #[test]
    fn write_statement_comes_back_as_error_row() {
        let dir = TempDir::new().expect("temp dir");
        let server = server(&dir, FlakySource::default());
        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"query_members_sql","arguments":{"sql":"DELETE FROM members"}}}"#,
                "\n"
            ),
        );

        assert_eq!(
            responses[0]["result"]["structuredContent"]["result"],
            json!([{"error": "only SELECT statements are allowed"}])
        );
    }

    #[test]
    fn refresh_tool_call_against_failing_provider() {
        let dir = TempDir::new().expect("temp dir");
        let source = FlakySource::default();
        let server = server(&dir, source.clone());
        source.down.store(true, Ordering::SeqCst);

        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"refresh_member_data"}}"#,
                "\n"
            ),
        );

        let report = &responses[0]["result"]["structuredContent"];
        assert_eq!(report["success"], json!(false));
        assert_eq!(report["member_count"], json!(2));
    }

    #[test]
    fn protocol_errors() {
        let dir = TempDir::new().expect("temp dir");
        let server = server(&dir, FlakySource::default());
        let responses = run(
            &server,
            concat!(
                "{not json\n",
                r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"drop_members"}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{}}"#,
                "\n",
                r#"{"jsonrpc":"1.0","id":8,"method":"tools/list"}"#,
                "\n",
                r#"{"id":9,"method":"ping"}"#,
                "\n",
                r#"{"method":"ping"}"#,
                "\n"
            ),
        );

        assert_eq!(responses[0]["error"]["code"], json!(-32700));
        assert_eq!(responses[1]["error"]["code"], json!(-32601));
        assert_eq!(responses[2]["error"]["code"], json!(-32602));
        assert_eq!(responses[3]["error"]["code"], json!(-32602));
        assert_eq!(responses[4]["id"], json!(8));
        assert_eq!(responses[4]["error"]["code"], json!(-32600));
        assert_eq!(responses[5]["error"]["code"], json!(-32600));
        assert_eq!(responses.len(), 6, "versionless notification gets no response");
    }
}

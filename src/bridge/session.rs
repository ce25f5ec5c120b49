use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::error;

use super::protocol::{RpcError, METHOD_NOT_FOUND, PROTOCOL_VERSION};
use crate::{db::DBLayer, model::device::Device, storage::StorageService};

const DEFAULT_CAPTURE_LIMIT: usize = 20;
const MAX_CAPTURE_LIMIT: usize = 200;

/// One bridge session, built for a single request and bound to one device.
///
/// It owns the resolved device row and borrows the stores; it is dropped when
/// the request finishes and is never handed to another caller. Every lookup
/// below is keyed by `self.device.id`.
pub struct BridgeSession<'a> {
    device: Device,
    db: &'a DBLayer,
    storage: &'a StorageService,
    payload_cap: usize,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct LimitArgs {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

/// A tool failed in a way the agent should see as a result, not a protocol error.
enum ToolOutcome {
    Ok(Value),
    Failed(String),
}

impl<'a> BridgeSession<'a> {
    pub fn new(
        device: Device,
        db: &'a DBLayer,
        storage: &'a StorageService,
        payload_cap: usize,
    ) -> Self {
        Self {
            device,
            db,
            storage,
            payload_cap,
        }
    }

    pub async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => {
                let call: ToolCall = parse_args(params)?;
                self.call_tool(call).await
            }
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": format!(
                "Read-only access to data captured by device \"{}\".",
                self.device.display_name
            ),
        })
    }

    async fn call_tool(&self, call: ToolCall) -> Result<Value, RpcError> {
        let outcome = match call.name.as_str() {
            "list_recent_captures" => self.list_recent_captures(parse_args(call.arguments)?).await,
            "get_capture" => self.get_capture(parse_args(call.arguments)?).await,
            "get_device_info" => Ok(ToolOutcome::Ok(json!(self.device.info()))),
            "list_payloads" => self.list_payloads().await,
            "get_payload" => self.get_payload(parse_args(call.arguments)?).await,
            other => {
                return Err(RpcError::invalid_params(format!("unknown tool: {other}")));
            }
        }
        .map_err(|err| {
            error!(device_id = %self.device.id, tool = %call.name, error = ?err, "bridge tool failed");
            RpcError::internal()
        })?;

        Ok(match outcome {
            ToolOutcome::Ok(value) => tool_result(value, false),
            ToolOutcome::Failed(message) => tool_result(json!({ "error": message }), true),
        })
    }

    async fn list_recent_captures(&self, args: LimitArgs) -> anyhow::Result<ToolOutcome> {
        let limit = args
            .limit
            .unwrap_or(DEFAULT_CAPTURE_LIMIT)
            .clamp(1, MAX_CAPTURE_LIMIT);
        let captures = self.db.list_recent_captures(&self.device.id, limit).await?;
        Ok(ToolOutcome::Ok(json!({ "captures": captures })))
    }

    async fn get_capture(&self, args: IdArgs) -> anyhow::Result<ToolOutcome> {
        Ok(match self.db.load_capture(&self.device.id, &args.id).await? {
            Some(capture) => ToolOutcome::Ok(json!(capture)),
            None => ToolOutcome::Failed(format!("capture {} not found", args.id)),
        })
    }

    async fn list_payloads(&self) -> anyhow::Result<ToolOutcome> {
        let cap = self.payload_cap;
        let payloads: Vec<Value> = self
            .db
            .list_payloads(&self.device.id)
            .await?
            .into_iter()
            .map(|p| {
                let oversized = p.size > cap;
                json!({
                    "id": p.id,
                    "filename": p.filename,
                    "original_name": p.original_name,
                    "mime_type": p.mime_type,
                    "size": p.size,
                    "created_ts": p.created_ts,
                    "oversized": oversized,
                })
            })
            .collect();
        Ok(ToolOutcome::Ok(json!({
            "payloads": payloads,
            "size_cap_bytes": cap,
        })))
    }

    async fn get_payload(&self, args: IdArgs) -> anyhow::Result<ToolOutcome> {
        let Some(payload) = self.db.load_payload(&self.device.id, &args.id).await? else {
            return Ok(ToolOutcome::Failed(format!("payload {} not found", args.id)));
        };

        let read = self
            .storage
            .read_capped(&self.device.id, &payload.filename, self.payload_cap)
            .await?;
        let truncated = read.truncated();

        let text = payload
            .is_textual()
            .then(|| utf8_prefix(&read.bytes))
            .flatten();
        let (encoding, data, returned) = match text {
            Some(text) => {
                let returned = text.len();
                ("utf8", text.to_string(), returned)
            }
            None => ("base64", STANDARD.encode(&read.bytes), read.bytes.len()),
        };

        let mut body = json!({
            "id": payload.id,
            "filename": payload.filename,
            "mime_type": payload.mime_type,
            "total_size": read.total_size,
            "returned_bytes": returned,
            "truncated": truncated,
            "encoding": encoding,
            "data": data,
        });
        if truncated {
            body["notice"] = json!(format!(
                "Payload truncated: returned {returned} of {} bytes (cap {} bytes). \
                 Fetch the full object from GET /api/payloads/{}.",
                read.total_size, self.payload_cap, payload.id
            ));
        }
        Ok(ToolOutcome::Ok(body))
    }
}

/// Absent params are treated as an empty object so required fields still fail.
fn parse_args<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(e.to_string()))
}

/// Valid UTF-8 prefix of `bytes`; a multi-byte char cut by the cap is dropped.
/// `None` when invalid bytes appear before the cut, so the caller falls back to base64.
fn utf8_prefix(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

fn tool_result(value: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": value,
        "isError": is_error,
    })
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "list_recent_captures",
            "description": "List this device's most recent captures, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "maximum": MAX_CAPTURE_LIMIT }
                }
            }
        },
        {
            "name": "get_capture",
            "description": "Fetch one capture of this device by id.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }
        },
        {
            "name": "get_device_info",
            "description": "Describe the device this session is bound to.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "list_payloads",
            "description": "List large objects uploaded by this device.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "get_payload",
            "description": "Read a large object. Content above the size cap is truncated with a notice.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }
        }
    ])
}

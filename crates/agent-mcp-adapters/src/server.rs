//! Serving an MCP server object over a transport
//!
//! [`McpServer`] is the shape of a server implemented in this process. [`serve`]
//! drives one over any transport endpoint, answering JSON-RPC requests the
//! same way an external server would, so in-process connections go through
//! the regular session and handshake code.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;
use crate::error::MCPError;
use crate::protocol::{
    self, Incoming, MCPPromptDefinition, MCPPromptResult, MCPResourceContent,
    MCPResourceDefinition, MCPServerInfo, MCPToolDefinition, MCPToolResult, codes, methods,
};
use crate::transport::Transport;

/// A server implemented in this process
#[async_trait]
pub trait McpServer: Send + Sync {
    /// Identity announced in the `initialize` reply
    fn server_info(&self) -> MCPServerInfo;

    async fn list_tools(&self) -> Result<Vec<MCPToolDefinition>>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<MCPToolResult>;

    async fn list_resources(&self) -> Result<Vec<MCPResourceDefinition>> {
        Ok(Vec::new())
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<MCPResourceContent>> {
        Err(MCPError::Request(format!("unknown resource: {uri}")))
    }

    async fn list_prompts(&self) -> Result<Vec<MCPPromptDefinition>> {
        Ok(Vec::new())
    }

    async fn get_prompt(&self, name: &str, _arguments: Map<String, Value>) -> Result<MCPPromptResult> {
        Err(MCPError::Request(format!("unknown prompt: {name}")))
    }
}

/// Answer requests arriving on `endpoint` until the peer goes away
///
/// Each request is handled on its own task, so a slow tool call never holds
/// up the others. The endpoint is closed when the loop ends.
pub fn serve<T>(server: Arc<dyn McpServer>, endpoint: T) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    let endpoint = Arc::new(endpoint);

    tokio::spawn(async move {
        if let Err(e) = endpoint.open().await {
            warn!("In-process server endpoint failed to open: {}", e);
            return;
        }

        while let Some(message) = endpoint.receive().await {
            match Incoming::classify(message) {
                Some(Incoming::Request { id, method, params }) => {
                    let server = server.clone();
                    let endpoint = endpoint.clone();
                    tokio::spawn(async move {
                        let reply = match dispatch(server.as_ref(), &method, params).await {
                            Ok(result) => protocol::success_response(id, result),
                            Err((code, message)) => protocol::error_response(id, code, &message),
                        };
                        if let Err(e) = endpoint.send(reply).await {
                            debug!("Dropping reply to '{}': {}", method, e);
                        }
                    });
                }
                Some(Incoming::Notification { method }) => {
                    debug!("In-process server got notification '{}'", method);
                }
                Some(Incoming::Response { id, .. }) => {
                    debug!("In-process server ignoring unexpected response {}", id);
                }
                None => warn!("In-process server received an unrecognised message"),
            }
        }

        let _ = endpoint.close().await;
        debug!("In-process server loop finished");
    })
}

async fn dispatch(
    server: &dyn McpServer,
    method: &str,
    params: Value,
) -> std::result::Result<Value, (i64, String)> {
    let internal = |e: MCPError| (codes::INTERNAL_ERROR, e.to_string());

    match method {
        methods::INITIALIZE => Ok(server.server_info().to_initialize_result()),
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => {
            let tools = server.list_tools().await.map_err(internal)?;
            Ok(json!({ "tools": tools }))
        }
        methods::TOOLS_CALL => {
            let name = required_str(&params, "name")?;
            let result = server
                .call_tool(name, arguments(&params))
                .await
                .map_err(internal)?;
            serde_json::to_value(result).map_err(|e| internal(e.into()))
        }
        methods::RESOURCES_LIST => {
            let resources = server.list_resources().await.map_err(internal)?;
            Ok(json!({ "resources": resources }))
        }
        methods::RESOURCES_READ => {
            let uri = required_str(&params, "uri")?;
            let contents = server.read_resource(uri).await.map_err(internal)?;
            Ok(json!({ "contents": contents }))
        }
        methods::PROMPTS_LIST => {
            let prompts = server.list_prompts().await.map_err(internal)?;
            Ok(json!({ "prompts": prompts }))
        }
        methods::PROMPTS_GET => {
            let name = required_str(&params, "name")?;
            let prompt = server
                .get_prompt(name, arguments(&params))
                .await
                .map_err(internal)?;
            serde_json::to_value(prompt).map_err(|e| internal(e.into()))
        }
        other => Err((
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, (i64, String)> {
    params[key]
        .as_str()
        .ok_or_else(|| (codes::INVALID_PARAMS, format!("missing '{key}' parameter")))
}

fn arguments(params: &Value) -> Map<String, Value> {
    params["arguments"].as_object().cloned().unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::test_support::{Behaviour, ScriptedServer};
    use super::*;
    use crate::transport::InProcessTransport;

    async fn start(server: ScriptedServer) -> InProcessTransport {
        let (client, server_end) = InProcessTransport::pair();
        serve(server.into_arc(), server_end);
        client.open().await.unwrap();
        client
    }

    async fn roundtrip(client: &InProcessTransport, id: u64, method: &str, params: Value) -> Value {
        client
            .send(protocol::request(id, method, params))
            .await
            .unwrap();
        client.receive().await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let client = start(ScriptedServer::new("calc").tool("add", None, Behaviour::Echo)).await;

        let reply = roundtrip(&client, 1, methods::INITIALIZE, protocol::initialize_params()).await;
        assert_eq!(reply["result"]["serverInfo"]["name"], "calc");

        let reply = roundtrip(&client, 2, methods::TOOLS_LIST, json!({})).await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"]["tools"][0]["name"], "add");
    }

    #[tokio::test]
    async fn test_call_tool_and_errors() {
        let client = start(
            ScriptedServer::new("calc")
                .tool("add", None, Behaviour::Reply(MCPToolResult::text("3")))
                .tool("boom", None, Behaviour::Fail("kaput".to_string())),
        )
        .await;

        let reply = roundtrip(
            &client,
            1,
            methods::TOOLS_CALL,
            json!({"name": "add", "arguments": {"a": 1, "b": 2}}),
        )
        .await;
        assert_eq!(reply["result"]["content"][0]["text"], "3");

        let reply = roundtrip(&client, 2, methods::TOOLS_CALL, json!({"name": "boom"})).await;
        assert_eq!(reply["error"]["code"], codes::INTERNAL_ERROR);

        let reply = roundtrip(&client, 3, methods::TOOLS_CALL, json!({})).await;
        assert_eq!(reply["error"]["code"], codes::INVALID_PARAMS);

        let reply = roundtrip(&client, 4, "sampling/createMessage", json!({})).await;
        assert_eq!(reply["error"]["code"], codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_default_resource_and_prompt_handlers() {
        let client = start(ScriptedServer::new("calc")).await;

        let reply = roundtrip(&client, 1, methods::RESOURCES_LIST, json!({})).await;
        assert_eq!(reply["result"]["resources"], json!([]));

        let reply = roundtrip(&client, 2, methods::PROMPTS_GET, json!({"name": "greet"})).await;
        assert!(reply["error"]["message"].as_str().unwrap().contains("greet"));
    }

    #[tokio::test]
    async fn test_loop_ends_when_client_closes() {
        let (client, server_end) = InProcessTransport::pair();
        let handle = serve(ScriptedServer::new("calc").into_arc(), server_end);
        client.open().await.unwrap();
        client.close().await.unwrap();
        handle.await.unwrap();
    }
}

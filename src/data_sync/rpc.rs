use crate::errors::{MirrorError, MirrorResult};
use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Minimal JSON-RPC client for `eth_call` and `eth_blockNumber` over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
}

impl JsonRpcClient {
    pub fn new(rpc_url: String, timeout: Duration) -> eyre::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to create HTTP client: {}", e))?;

        Ok(Self { http_client, rpc_url })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Encode `call`, run it against `to` at the latest block and decode the return value.
    pub async fn call<C: SolCall>(&self, to: Address, call: C) -> MirrorResult<C::Return> {
        let data = call.abi_encode();
        let response = self.eth_call(to, data.into()).await?;
        Ok(C::abi_decode_returns(&response)?)
    }

    pub async fn eth_call(&self, to: Address, data: Bytes) -> MirrorResult<Bytes> {
        let params = serde_json::json!([
            {
                "to": format!("{:#x}", to),
                "data": format!("{:#x}", data)
            },
            "latest"
        ]);

        let result = self.request("eth_call", params).await?;
        let result = result.as_str().ok_or_else(|| MirrorError::Rpc("eth_call result is not a string".to_string()))?;

        let bytes = hex::decode(result.trim_start_matches("0x")).map_err(|e| MirrorError::Rpc(format!("Invalid hex in eth_call result: {}", e)))?;
        Ok(bytes.into())
    }

    pub async fn block_number(&self) -> MirrorResult<u64> {
        let result = self.request("eth_blockNumber", serde_json::json!([])).await?;
        let result = result.as_str().ok_or_else(|| MirrorError::Rpc("eth_blockNumber result is not a string".to_string()))?;
        parse_hex_u64(result)
    }

    async fn request(&self, method: &str, params: Value) -> MirrorResult<Value> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        debug!("RPC request {} to {}", method, self.rpc_url);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| MirrorError::Rpc(e.to_string()))?;

        let mut response_json: Value = response.json().await.map_err(|e| MirrorError::Rpc(e.to_string()))?;

        if let Some(error) = response_json.get("error") {
            return Err(MirrorError::Rpc(format!("{} failed: {}", method, error)));
        }

        response_json
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| MirrorError::Rpc(format!("Missing result in {} response", method)))
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> MirrorResult<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|e| MirrorError::Rpc(format!("Invalid hex quantity {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x1a2b3c").unwrap(), 0x1a2b3c);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_client_creation() {
        let client = JsonRpcClient::new("https://rpc.example.org".to_string(), Duration::from_secs(10)).unwrap();
        assert_eq!(client.rpc_url(), "https://rpc.example.org");
    }
}

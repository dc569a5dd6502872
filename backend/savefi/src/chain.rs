//! Ethereum JSON-RPC chain client: allowance reads, approvals, contract
//! actions and receipt polling.
//!
//! ## Resilience
//!
//! * Read calls (`eth_chainId`, `eth_call`) are retried with exponential
//!   back-off on transport errors and rate limits, up to
//!   [`MAX_READ_ATTEMPTS`] attempts.
//! * `eth_sendTransaction` is never retried: a resend could broadcast twice.
//! * Confirmation polling has no deadline and never gives up on transport
//!   errors: once a transaction is broadcast its outcome must be observed,
//!   so failed polls back off and keep going.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::abi::{self, AbiValue, ContractCall, ALLOWANCE_SIGNATURE, APPROVE_SIGNATURE};
use crate::errors::{Result, SaveFiError};
use crate::primitives::{Address, TxRef};

const MAX_READ_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 10_000;

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx: TxRef,
    pub block_number: Option<u64>,
}

/// Everything the orchestrator needs from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Amount of `token` that `spender` may currently move on behalf of
    /// `owner`, in base units.
    async fn read_allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Result<u128>;

    /// Grant `spender` the maximum allowance of `token` from `owner`.
    async fn send_approve(&self, token: &Address, owner: &Address, spender: &Address) -> Result<TxRef>;

    /// Submit `call` against `contract` from `owner`.
    async fn send_contract_action(
        &self,
        owner: &Address,
        contract: &Address,
        call: &ContractCall,
    ) -> Result<TxRef>;

    /// Block until `tx` is mined; a reverted receipt is an error.
    async fn await_confirmation(&self, tx: &TxRef) -> Result<Receipt>;
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

/// JSON-RPC client against a node or wallet provider that holds the signing
/// account (`eth_sendTransaction` signs on the provider side).
pub struct JsonRpcChainClient {
    client: Client,
    rpc_url: String,
    poll_interval: Duration,
}

impl JsonRpcChainClient {
    pub fn new(client: Client, rpc_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            poll_interval,
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| SaveFiError::Network(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SaveFiError::Network(format!(
                "{method}: RPC responded with status {status}"
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| SaveFiError::MalformedResponse(format!("{method}: RPC body is not JSON-RPC: {e}")))?;
        if let Some(err) = body.error {
            return Err(classify_rpc_error(err));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    /// Read-only request with back-off on network failures.
    async fn read(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_MS;
        let mut attempt = 1;
        loop {
            match self.request(method, params.clone()).await {
                Err(SaveFiError::Network(msg)) if attempt < MAX_READ_ATTEMPTS => {
                    warn!("RPC read failed (attempt {attempt}, will retry in {backoff}ms): {msg}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_MS);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_transaction(&self, from: &Address, to: &Address, data: String) -> Result<TxRef> {
        let result = self
            .request(
                "eth_sendTransaction",
                json!([{ "from": from, "to": to, "data": data }]),
            )
            .await?;
        result
            .as_str()
            .map(|h| TxRef(h.to_string()))
            .ok_or_else(|| SaveFiError::MalformedResponse(format!("transaction hash missing: {result}")))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn chain_id(&self) -> Result<u64> {
        let result = self.read("eth_chainId", json!([])).await?;
        let hex_id = result
            .as_str()
            .ok_or_else(|| SaveFiError::MalformedResponse(format!("chain id: {result}")))?;
        parse_quantity(hex_id)
    }

    async fn read_allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Result<u128> {
        let call = ContractCall::new(
            ALLOWANCE_SIGNATURE,
            vec![AbiValue::Address(owner.clone()), AbiValue::Address(spender.clone())],
        );
        let result = self
            .read(
                "eth_call",
                json!([{ "to": token, "data": call.calldata() }, "latest"]),
            )
            .await?;
        let word = result
            .as_str()
            .ok_or_else(|| SaveFiError::MalformedResponse(format!("allowance: {result}")))?;
        let allowance = abi::decode_uint_saturating(word)?;
        debug!("Allowance {owner} -> {spender}: {allowance}");
        Ok(allowance)
    }

    async fn send_approve(&self, token: &Address, owner: &Address, spender: &Address) -> Result<TxRef> {
        let call = ContractCall::new(
            APPROVE_SIGNATURE,
            vec![AbiValue::Address(spender.clone()), AbiValue::MaxUint],
        );
        let tx = self.send_transaction(owner, token, call.calldata()).await?;
        info!("Approval submitted: {tx}");
        Ok(tx)
    }

    async fn send_contract_action(
        &self,
        owner: &Address,
        contract: &Address,
        call: &ContractCall,
    ) -> Result<TxRef> {
        let tx = self
            .send_transaction(owner, contract, call.calldata())
            .await?;
        info!("{} submitted: {tx}", call.name());
        Ok(tx)
    }

    async fn await_confirmation(&self, tx: &TxRef) -> Result<Receipt> {
        let mut backoff = self.poll_interval;
        loop {
            let result = match self.request("eth_getTransactionReceipt", json!([tx])).await {
                Ok(result) => {
                    backoff = self.poll_interval;
                    result
                }
                Err(SaveFiError::Network(msg)) => {
                    warn!("Receipt poll for {tx} failed, retrying in {backoff:?}: {msg}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
                    continue;
                }
                Err(e) => return Err(e),
            };

            if result.is_null() {
                debug!("Receipt for {tx} not available yet");
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let receipt: RawReceipt = serde_json::from_value(result)?;
            let block_number = receipt
                .block_number
                .as_deref()
                .map(parse_quantity)
                .transpose()?;

            return match receipt.status.as_deref() {
                Some("0x1") | None => Ok(Receipt {
                    tx: tx.clone(),
                    block_number,
                }),
                Some(other) => Err(SaveFiError::ContractRevert {
                    tx: Some(tx.to_string()),
                    message: format!("receipt status {other}"),
                }),
            };
        }
    }
}

/// Map a JSON-RPC error object onto the error taxonomy.
fn classify_rpc_error(err: RpcError) -> SaveFiError {
    let lowered = err.message.to_lowercase();
    if err.code == USER_REJECTED_CODE || lowered.contains("user rejected") || lowered.contains("user denied") {
        SaveFiError::WalletRejection(err.message)
    } else if err.code == 3 || lowered.contains("execution reverted") {
        SaveFiError::ContractRevert {
            tx: None,
            message: err.message,
        }
    } else {
        SaveFiError::Network(format!("RPC error {}: {}", err.code, err.message))
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(raw: &str) -> Result<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| SaveFiError::MalformedResponse(format!("bad quantity {raw}: {e}")))
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn addr(c: char) -> Address {
        Address::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap()
    }

    async fn client_for(server: &MockServer) -> JsonRpcChainClient {
        JsonRpcChainClient::new(Client::new(), server.uri(), Duration::from_millis(10))
    }

    fn rpc_ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    fn rpc_err(code: i64, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": code, "message": message }
        }))
    }

    #[test]
    fn classify_errors() {
        let rejected = classify_rpc_error(RpcError {
            code: 4001,
            message: "User rejected the request.".into(),
        });
        assert!(matches!(rejected, SaveFiError::WalletRejection(_)));

        let reverted = classify_rpc_error(RpcError {
            code: -32000,
            message: "execution reverted: plan already started".into(),
        });
        assert!(matches!(reverted, SaveFiError::ContractRevert { tx: None, .. }));

        let other = classify_rpc_error(RpcError {
            code: -32603,
            message: "internal".into(),
        });
        assert!(matches!(other, SaveFiError::Network(_)));
    }

    #[tokio::test]
    async fn reads_allowance_from_eth_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_call" })))
            .respond_with(rpc_ok(json!(format!("0x{:064x}", 7_000_000u64))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let allowance = client.read_allowance(&addr('a'), &addr('c'), &addr('b')).await.unwrap();
        assert_eq!(allowance, 7_000_000);
    }

    #[tokio::test]
    async fn approve_targets_token_with_max_allowance() {
        let server = MockServer::start().await;
        let expected_data = ContractCall::new(
            APPROVE_SIGNATURE,
            vec![AbiValue::Address(addr('b')), AbiValue::MaxUint],
        )
        .calldata();
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_sendTransaction",
                "params": [{ "to": addr('a'), "data": expected_data }]
            })))
            .respond_with(rpc_ok(json!("0xapprove")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let tx = client.send_approve(&addr('a'), &addr('c'), &addr('b')).await.unwrap();
        assert_eq!(tx.as_str(), "0xapprove");
    }

    #[tokio::test]
    async fn wallet_rejection_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_err(4001, "User denied transaction signature"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let call = ContractCall::new("deposit(uint256)", vec![AbiValue::Uint(0)]);
        let err = client
            .send_contract_action(&addr('c'), &addr('b'), &call)
            .await
            .unwrap_err();
        assert!(matches!(err, SaveFiError::WalletRejection(_)));
    }

    #[tokio::test]
    async fn confirmation_polls_until_mined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
            .respond_with(rpc_ok(Value::Null))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
            .respond_with(rpc_ok(json!({ "status": "0x1", "blockNumber": "0x10" })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let receipt = client
            .await_confirmation(&TxRef("0xdeposit".into()))
            .await
            .unwrap();
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.tx.as_str(), "0xdeposit");
    }

    #[tokio::test]
    async fn confirmation_survives_rpc_outage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(MAX_READ_ATTEMPTS as u64 + 2)
            .expect(MAX_READ_ATTEMPTS as u64 + 2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
            .respond_with(rpc_ok(json!({ "status": "0x1", "blockNumber": "0x2a" })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let receipt = client
            .await_confirmation(&TxRef("0xdeposit".into()))
            .await
            .unwrap();
        assert_eq!(receipt.block_number, Some(42));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.chain_id().await.unwrap_err();
        assert!(matches!(err, SaveFiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn reverted_receipt_is_contract_revert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_ok(json!({ "status": "0x0", "blockNumber": "0x11" })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .await_confirmation(&TxRef("0xbad".into()))
            .await
            .unwrap_err();
        match err {
            SaveFiError::ContractRevert { tx, .. } => assert_eq!(tx.as_deref(), Some("0xbad")),
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reads_chain_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_chainId" })))
            .respond_with(rpc_ok(json!("0xaa36a7")))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.chain_id().await.unwrap(), 11_155_111);
    }
}

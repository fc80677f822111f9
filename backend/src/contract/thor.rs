use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::abi::{decode_hex, to_hex};
use super::transaction::{Clause, SignedTransaction};

#[derive(Debug, thiserror::Error)]
pub enum ThorError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {status} body={body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ThorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() || err.is_decode() {
            ThorError::Decode(err.to_string())
        } else {
            ThorError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClauseJson {
    pub to: Option<String>,
    pub value: String,
    pub data: String,
}

impl From<&Clause> for ClauseJson {
    fn from(clause: &Clause) -> Self {
        Self {
            to: clause.to.map(|to| to_hex(to.as_bytes())),
            value: format!("{:#x}", clause.value),
            data: to_hex(&clause.data),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub clauses: Vec<ClauseJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutput {
    pub data: String,
    #[serde(default)]
    pub gas_used: u64,
    pub reverted: bool,
    #[serde(default)]
    pub vm_error: String,
}

impl CallOutput {
    pub fn data_bytes(&self) -> Result<Vec<u8>, ThorError> {
        decode_hex(&self.data).map_err(|e| ThorError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockSummary {
    pub id: String,
    pub number: u64,
}

impl BlockSummary {
    /// First 8 bytes of the block id, used as a transaction's block reference.
    pub fn block_ref(&self) -> Result<u64, ThorError> {
        let id = decode_hex(&self.id).map_err(|e| ThorError::Decode(e.to_string()))?;
        let head: [u8; 8] = id
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ThorError::Decode(format!("short block id {}", self.id)))?;
        Ok(u64::from_be_bytes(head))
    }

    /// The chain tag is the last byte of the genesis block id.
    pub fn chain_tag(&self) -> Result<u8, ThorError> {
        let id = decode_hex(&self.id).map_err(|e| ThorError::Decode(e.to_string()))?;
        id.last()
            .copied()
            .ok_or_else(|| ThorError::Decode("empty block id".to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendResult {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptMeta {
    #[serde(rename = "blockID")]
    pub block_id: String,
    #[serde(rename = "txID")]
    pub tx_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub reverted: bool,
    #[serde(default)]
    pub gas_used: u64,
    pub meta: ReceiptMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionMeta {
    #[serde(rename = "blockID")]
    pub block_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    pub id: String,
    pub block_ref: String,
    pub expiration: u32,
    pub clauses: Vec<ClauseJson>,
    pub gas: u64,
    pub origin: String,
    #[serde(default)]
    pub delegator: Option<String>,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
}

/// Thin client over the Thor node REST API.
#[derive(Clone)]
pub struct ThorClient {
    http_client: HttpClient,
    base_url: String,
}

impl ThorClient {
    pub fn new(http_client: HttpClient, base_url: String) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Executes clauses against the best block (or `revision`) without committing.
    pub async fn call(
        &self,
        request: &CallRequest,
        revision: Option<&str>,
    ) -> Result<Vec<CallOutput>, ThorError> {
        let mut builder = self.http_client.post(self.url("/accounts/*")).json(request);
        if let Some(revision) = revision {
            builder = builder.query(&[("revision", revision)]);
        }
        Self::read_json("accounts/*", builder).await
    }

    pub async fn best_block(&self) -> Result<BlockSummary, ThorError> {
        self.block("best").await
    }

    pub async fn genesis_block(&self) -> Result<BlockSummary, ThorError> {
        self.block("0").await
    }

    async fn block(&self, revision: &str) -> Result<BlockSummary, ThorError> {
        let builder = self.http_client.get(self.url(&format!("/blocks/{}", revision)));
        let block: Option<BlockSummary> = Self::read_json("blocks", builder).await?;
        block.ok_or_else(|| ThorError::Decode(format!("block {} not found", revision)))
    }

    pub async fn send(&self, tx: &SignedTransaction) -> Result<SendResult, ThorError> {
        let body = serde_json::json!({ "raw": to_hex(&tx.encode()) });
        let builder = self.http_client.post(self.url("/transactions")).json(&body);
        Self::read_json("transactions", builder).await
    }

    /// `None` while the transaction is still pending.
    pub async fn receipt(&self, tx_id: &str) -> Result<Option<Receipt>, ThorError> {
        let builder = self
            .http_client
            .get(self.url(&format!("/transactions/{}/receipt", tx_id)));
        Self::read_json("receipt", builder).await
    }

    pub async fn transaction(&self, tx_id: &str) -> Result<Option<TransactionDetail>, ThorError> {
        let builder = self.http_client.get(self.url(&format!("/transactions/{}", tx_id)));
        Self::read_json("transaction", builder).await
    }

    async fn read_json<T: DeserializeOwned>(
        op: &'static str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ThorError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::warn!("Thor {} returned {}: {}", op, status, body);
            return Err(ThorError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        log::debug!("Thor {} ok", op);
        serde_json::from_str(&body).map_err(|e| ThorError::Decode(e.to_string()))
    }
}

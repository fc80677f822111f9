use std::time::Duration;

use async_trait::async_trait;
use ethereum_types::{H160, U256};
use secp256k1::SecretKey;

use super::abi::{self, Token, decode_bool, decode_revert_string, decode_uint, encode_call, format_address};
use super::thor::{CallOutput, CallRequest, ClauseJson, ThorClient, ThorError};
use super::transaction::{Clause, TransactionBody, VM_INVOCATION_GAS, intrinsic_gas, signer_address};

/// Blocks a transaction stays valid for after its block reference.
const TX_EXPIRATION: u32 = 32;

lazy_static::lazy_static! {
    static ref GET_CURRENT_CYCLE: [u8; 4] = abi::selector("getCurrentCycle()");
    static ref SUBMISSIONS: [u8; 4] = abi::selector("submissions(uint256,address)");
    static ref IS_USER_MAX_SUBMISSIONS_REACHED: [u8; 4] =
        abi::selector("isUserMaxSubmissionsReached(address)");
    static ref REWARDS_LEFT: [u8; 4] = abi::selector("rewardsLeft(uint256)");
    static ref REGISTER_VALID_SUBMISSION: [u8; 4] =
        abi::selector("registerValidSubmission(address,uint256)");
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Thor node error: {0}")]
    Thor(#[from] ThorError),
    #[error("ABI error: {0}")]
    Abi(#[from] abi::AbiError),
    #[error("call to {method} reverted: {reason}")]
    CallReverted { method: &'static str, reason: String },
    #[error("transaction reverted: {reason}")]
    Reverted { tx_id: Option<String>, reason: String },
    #[error("transaction {0} was not included in time")]
    ReceiptTimeout(String),
    #[error("empty response for {0}")]
    EmptyResponse(&'static str),
}

impl ContractError {
    /// The decoded revert string, when the failure came from a reverted transaction.
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            ContractError::Reverted { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Reads and writes on the reward contract. The contract owns all cycle state.
#[async_trait]
pub trait RewardContract: Send + Sync {
    async fn current_cycle(&self) -> Result<U256, ContractError>;

    async fn submissions(&self, cycle: U256, address: H160) -> Result<U256, ContractError>;

    async fn is_user_max_submissions_reached(&self, address: H160) -> Result<bool, ContractError>;

    async fn rewards_left(&self, cycle: U256) -> Result<U256, ContractError>;

    /// Sends `registerValidSubmission(address, amount)` and waits for inclusion.
    async fn register_valid_submission(&self, address: H160, amount: U256) -> Result<String, ContractError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolling {
    pub interval: Duration,
    pub attempts: u32,
}

/// The deployed EcoEarn contract, driven through a Thor node with the admin key.
#[derive(Clone)]
pub struct EcoEarnContract {
    thor: ThorClient,
    address: H160,
    signer: SecretKey,
    signer_address: H160,
    polling: ReceiptPolling,
}

impl EcoEarnContract {
    pub fn new(thor: ThorClient, address: H160, signer: SecretKey, polling: ReceiptPolling) -> Self {
        let signer_address = signer_address(&signer);
        log::info!(
            "EcoEarn contract {} driven by signer {}",
            format_address(&address),
            format_address(&signer_address)
        );
        Self {
            thor,
            address,
            signer,
            signer_address,
            polling,
        }
    }

    async fn read(&self, method: &'static str, data: Vec<u8>) -> Result<Vec<u8>, ContractError> {
        let request = CallRequest {
            clauses: vec![ClauseJson::from(&Clause::call(self.address, data))],
            ..Default::default()
        };
        let output = self
            .thor
            .call(&request, None)
            .await?
            .into_iter()
            .next()
            .ok_or(ContractError::EmptyResponse(method))?;
        if output.reverted {
            return Err(ContractError::CallReverted {
                method,
                reason: describe_revert(&output),
            });
        }
        Ok(output.data_bytes()?)
    }

    async fn simulate(&self, clause: &Clause) -> Result<CallOutput, ContractError> {
        let request = CallRequest {
            clauses: vec![ClauseJson::from(clause)],
            caller: Some(format_address(&self.signer_address)),
            ..Default::default()
        };
        self.thor
            .call(&request, None)
            .await?
            .into_iter()
            .next()
            .ok_or(ContractError::EmptyResponse("simulation"))
    }

    async fn wait_for_receipt(&self, tx_id: &str) -> Result<super::thor::Receipt, ContractError> {
        for attempt in 1..=self.polling.attempts.max(1) {
            if let Some(receipt) = self.thor.receipt(tx_id).await? {
                return Ok(receipt);
            }
            log::debug!("Receipt for {} not available yet (attempt {})", tx_id, attempt);
            tokio::time::sleep(self.polling.interval).await;
        }
        Err(ContractError::ReceiptTimeout(tx_id.to_string()))
    }

    /// Re-simulates an included transaction's clauses at its block to recover the revert string.
    /// Never fails; an explanatory string is returned instead.
    pub async fn decode_revert_reason(&self, tx_id: &str) -> String {
        match self.try_decode_revert_reason(tx_id).await {
            Ok(reason) => reason,
            Err(e) => {
                log::error!("Unable to decode revert reason for {}: {}", tx_id, e);
                "Unable to decode revert reason.".to_string()
            }
        }
    }

    async fn try_decode_revert_reason(&self, tx_id: &str) -> Result<String, ContractError> {
        let tx = self
            .thor
            .transaction(tx_id)
            .await?
            .ok_or(ContractError::EmptyResponse("transaction"))?;
        let revision = tx.meta.as_ref().map(|m| m.block_id.clone());
        log::debug!(
            "Re-simulating {} at {}",
            tx.id,
            revision.as_deref().unwrap_or("best")
        );
        let request = CallRequest {
            gas: Some(tx.gas),
            caller: Some(tx.origin.clone()),
            gas_payer: Some(tx.delegator.clone().unwrap_or_else(|| tx.origin.clone())),
            expiration: Some(tx.expiration),
            block_ref: Some(tx.block_ref.clone()),
            clauses: tx.clauses,
        };
        let outputs = self.thor.call(&request, revision.as_deref()).await?;
        Ok(first_revert(&outputs).unwrap_or_else(|| "No revert reason found.".to_string()))
    }
}

fn describe_revert(output: &CallOutput) -> String {
    output
        .data_bytes()
        .ok()
        .and_then(|data| decode_revert_string(&data))
        .unwrap_or_else(|| output.vm_error.clone())
}

fn first_revert(outputs: &[CallOutput]) -> Option<String> {
    outputs
        .iter()
        .enumerate()
        .find(|(_, output)| output.reverted)
        .map(|(i, output)| format!("Revert on clause #{}: {}", i, describe_revert(output)))
}

#[async_trait]
impl RewardContract for EcoEarnContract {
    async fn current_cycle(&self) -> Result<U256, ContractError> {
        let data = self
            .read("getCurrentCycle", encode_call(*GET_CURRENT_CYCLE, &[]))
            .await?;
        Ok(decode_uint(&data)?)
    }

    async fn submissions(&self, cycle: U256, address: H160) -> Result<U256, ContractError> {
        let call = encode_call(*SUBMISSIONS, &[Token::Uint(cycle), Token::Address(address)]);
        let data = self.read("submissions", call).await?;
        Ok(decode_uint(&data)?)
    }

    async fn is_user_max_submissions_reached(&self, address: H160) -> Result<bool, ContractError> {
        let call = encode_call(*IS_USER_MAX_SUBMISSIONS_REACHED, &[Token::Address(address)]);
        let data = self.read("isUserMaxSubmissionsReached", call).await?;
        Ok(decode_bool(&data)?)
    }

    async fn rewards_left(&self, cycle: U256) -> Result<U256, ContractError> {
        let data = self
            .read("rewardsLeft", encode_call(*REWARDS_LEFT, &[Token::Uint(cycle)]))
            .await?;
        Ok(decode_uint(&data)?)
    }

    async fn register_valid_submission(&self, address: H160, amount: U256) -> Result<String, ContractError> {
        let clause = Clause::call(
            self.address,
            encode_call(
                *REGISTER_VALID_SUBMISSION,
                &[Token::Address(address), Token::Uint(amount)],
            ),
        );

        let simulation = self.simulate(&clause).await?;
        if simulation.reverted {
            let reason = format!("Revert on clause #0: {}", describe_revert(&simulation));
            log::warn!("registerValidSubmission would revert for {}: {}", format_address(&address), reason);
            return Err(ContractError::Reverted { tx_id: None, reason });
        }

        let clauses = vec![clause];
        let vm_gas = if simulation.gas_used > 0 {
            simulation.gas_used + VM_INVOCATION_GAS
        } else {
            0
        };
        let gas = intrinsic_gas(&clauses) + vm_gas;
        let genesis = self.thor.genesis_block().await?;
        let best = self.thor.best_block().await?;
        log::debug!("Referencing best block #{} ({})", best.number, best.id);

        let body = TransactionBody {
            chain_tag: genesis.chain_tag()?,
            block_ref: best.block_ref()?,
            expiration: TX_EXPIRATION,
            clauses,
            gas_price_coef: 0,
            gas,
            depends_on: None,
            nonce: rand::random::<u64>(),
        };
        let signed = body.sign(&self.signer);
        let sent = self.thor.send(&signed).await?;
        log::info!("Sent registerValidSubmission tx {} (gas {})", sent.id, gas);

        let receipt = self.wait_for_receipt(&sent.id).await?;
        if receipt.reverted {
            let reason = self.decode_revert_reason(&receipt.meta.tx_id).await;
            log::warn!("Transaction {} reverted: {}", receipt.meta.tx_id, reason);
            return Err(ContractError::Reverted {
                tx_id: Some(receipt.meta.tx_id),
                reason,
            });
        }
        log::info!(
            "Transaction {} included in block {} (gas used {})",
            receipt.meta.tx_id,
            receipt.meta.block_id,
            receipt.gas_used
        );
        Ok(sent.id)
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::http::StatusCode;
use chrono::{DateTime, Utc};
use ethereum_types::{H160, U256};
use shared::{CycleStatus, RemainingSubmissions, Verdict};

use crate::cache::cache_service::SubmissionCache;
use crate::contract::abi::format_address;
use crate::contract::service::RewardContract;
use crate::error::ApiError;
use crate::submission::models::Submission;
use crate::vision::verdict::{VerdictService, earns_reward};

type AddressLocks = Arc<Mutex<HashMap<H160, Arc<tokio::sync::Mutex<()>>>>>;

/// Runs the submit pipeline and answers remaining-submission queries.
#[derive(Clone)]
pub struct SubmissionService {
    contract: Arc<dyn RewardContract>,
    verdicts: VerdictService,
    cache: SubmissionCache,
    max_submissions: u32,
    reward_amount: U256,
    locks: AddressLocks,
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.low_u64()
    }
}

impl SubmissionService {
    pub fn new(
        contract: Arc<dyn RewardContract>,
        verdicts: VerdictService,
        cache: SubmissionCache,
        max_submissions: u32,
        reward_amount: U256,
    ) -> Self {
        Self {
            contract,
            verdicts,
            cache,
            max_submissions,
            reward_amount,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn address_lock(&self, address: H160) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map holds an idle lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(address).or_default().clone()
    }

    /// Rejects addresses that used up the cycle's submissions. Runs before the model is asked.
    pub async fn check_eligibility(&self, address: H160) -> Result<(), ApiError> {
        let key = format_address(&address);
        log::info!("Validating submission for address: {}", key);

        let flagged = self
            .contract
            .is_user_max_submissions_reached(address)
            .await
            .map_err(ApiError::validating)?;
        let cycle = self.contract.current_cycle().await.map_err(ApiError::validating)?;
        let used = self
            .contract
            .submissions(cycle, address)
            .await
            .map_err(ApiError::validating)?;
        log::info!("User {} has submitted {} times in cycle {}", key, used, cycle);

        if flagged || used >= U256::from(self.max_submissions) {
            return Err(ApiError::CapReached {
                max: self.max_submissions,
                status: StatusCode::CONFLICT,
            });
        }
        Ok(())
    }

    /// Gate, verdict and, for a passing verdict, the on-chain reward.
    /// Submissions from one address are processed one at a time.
    pub async fn submit(&self, submission: Submission) -> Result<Verdict, ApiError> {
        let lock = self.address_lock(submission.address);
        let _guard = lock.lock().await;
        let key = format_address(&submission.address);
        log::info!(
            "Processing submission {} from {} (device {}) received at {}",
            submission.id,
            key,
            submission.device_id,
            submission.timestamp
        );

        self.check_eligibility(submission.address).await?;

        let verdict = self.verdicts.assess(&submission.images).await;
        log::info!(
            "Submission {} verdict: {} ({})",
            submission.id,
            verdict.validity_factor,
            verdict.description_of_analysis
        );

        if earns_reward(&verdict) {
            let tx_id = self
                .contract
                .register_valid_submission(submission.address, self.reward_amount)
                .await
                .map_err(|e| ApiError::registering(e, self.max_submissions))?;
            log::info!("Registered submission {} for {} in tx {}", submission.id, key, tx_id);
        }

        Ok(verdict)
    }

    /// Cached answer; a miss or stale entry is refreshed from the contract.
    pub async fn remaining(&self, address: H160, now: DateTime<Utc>) -> Result<RemainingSubmissions, ApiError> {
        if let Some(cached) = self.cache.get(&address, now) {
            return Ok(cached);
        }
        let fresh = self.remaining_live(address).await?;
        self.cache.insert(&address, fresh, now);
        Ok(fresh)
    }

    /// Reads the contract directly, bypassing the cache.
    pub async fn remaining_live(&self, address: H160) -> Result<RemainingSubmissions, ApiError> {
        let cycle = self.contract.current_cycle().await.map_err(ApiError::fetching)?;
        let used = self
            .contract
            .submissions(cycle, address)
            .await
            .map_err(ApiError::fetching)?;
        let result = RemainingSubmissions::from_used(saturating_u64(used), self.max_submissions);
        log::info!(
            "Remaining submissions for {} in cycle {}: {}/{}",
            format_address(&address),
            cycle,
            result.remaining,
            result.max
        );
        Ok(result)
    }

    pub async fn cycle_status(&self) -> Result<CycleStatus, ApiError> {
        let cycle = self.contract.current_cycle().await.map_err(ApiError::fetching)?;
        let rewards_left = self.contract.rewards_left(cycle).await.map_err(ApiError::fetching)?;
        Ok(CycleStatus {
            cycle: saturating_u64(cycle),
            rewards_left: rewards_left.to_string(),
            max_submissions: self.max_submissions,
        })
    }
}

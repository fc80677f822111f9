use serde::{Deserialize, Serialize};

/// Body of `POST /submitReceipt`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubmitReceiptRequest {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "deviceID")]
    pub device_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub validity_factor: f64,
    pub description_of_analysis: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SubmitReceiptResponse {
    pub validation: Verdict,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemainingSubmissions {
    pub remaining: u32,
    pub max: u32,
}

impl RemainingSubmissions {
    pub fn from_used(used: u64, max: u32) -> Self {
        let remaining = u64::from(max).saturating_sub(used) as u32;
        Self { remaining, max }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CycleStatus {
    pub cycle: u64,
    /// Wei, as a decimal string.
    pub rewards_left: String,
    pub max_submissions: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    pub method: String,
    pub endpoint: String,
    pub ip_address: String,
    pub status: u16,
    pub response_time: u64,
}

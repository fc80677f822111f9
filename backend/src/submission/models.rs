use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use ethereum_types::H160;
use image::ImageFormat;
use shared::SubmitReceiptRequest;
use uuid::Uuid;

use crate::contract::abi::parse_address;
use crate::error::ApiError;

/// A receipt submission accepted for processing. Lives only for the request.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    /// Receipt first, product second.
    pub images: Vec<String>,
    pub address: H160,
    pub device_id: String,
    pub timestamp: i64,
}

impl Submission {
    /// Checks the request shape before anything leaves the process.
    pub fn from_request(request: SubmitReceiptRequest, now: DateTime<Utc>) -> Result<Self, ApiError> {
        if request.images.len() != 2 {
            return Err(ApiError::validation("Both receipt and product images are required"));
        }
        for image in &request.images {
            detect_format(image)?;
        }
        let address = parse_wallet_address(&request.address)?;
        if request.device_id.trim().is_empty() {
            return Err(ApiError::validation("Device ID is required"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            images: request.images,
            address,
            device_id: request.device_id,
            timestamp: now.timestamp_millis(),
        })
    }
}

/// A wallet address as sent by clients: exactly `0x` plus 40 hex digits.
pub fn parse_wallet_address(raw: &str) -> Result<H160, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::validation("Wallet address is required"));
    }
    if raw.len() != 42 {
        return Err(ApiError::validation("Invalid wallet address"));
    }
    parse_address(raw).map_err(|_| ApiError::validation("Invalid wallet address"))
}

/// Accepts bare base64 or a `data:image/...;base64,` URL whose payload is a known image format.
pub fn detect_format(image: &str) -> Result<ImageFormat, ApiError> {
    let invalid = || ApiError::validation("Invalid image format");
    let payload = match image.strip_prefix("data:") {
        Some(rest) => {
            let (media_type, data) = rest.split_once(',').ok_or_else(invalid)?;
            if !media_type.starts_with("image/") || !media_type.ends_with(";base64") {
                return Err(invalid());
            }
            data
        }
        None => image,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(invalid());
    }
    let bytes = STANDARD.decode(payload).map_err(|_| invalid())?;
    image::guess_format(&bytes).map_err(|_| invalid())
}

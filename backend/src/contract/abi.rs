//! Solidity ABI helpers for the handful of calls the reward contract needs.

use ethereum_types::{H160, U256};
use ethers_core::abi::{self, ParamType};
use ethers_core::utils;

pub use ethers_core::abi::Token;

/// `bytes4(keccak256("Error(string)"))`
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("invalid amount: {0}")]
    Amount(String),
    #[error("cannot decode return data: {0}")]
    Decode(String),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    utils::keccak256(data)
}

pub fn selector(signature: &str) -> [u8; 4] {
    utils::id(signature)
}

pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let mut data = selector.to_vec();
    data.extend(abi::encode(args));
    data
}

fn decode_single(kind: ParamType, data: &[u8]) -> Result<Token, AbiError> {
    abi::decode(&[kind], data)
        .map_err(|e| AbiError::Decode(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| AbiError::Decode("no value returned".to_string()))
}

pub fn decode_uint(data: &[u8]) -> Result<U256, AbiError> {
    decode_single(ParamType::Uint(256), data)?
        .into_uint()
        .ok_or_else(|| AbiError::Decode("expected uint256".to_string()))
}

pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    decode_single(ParamType::Bool, data)?
        .into_bool()
        .ok_or_else(|| AbiError::Decode("expected bool".to_string()))
}

/// Decodes the payload of a `revert("...")` / `require(cond, "...")`.
pub fn decode_revert_string(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR[..])?;
    decode_single(ParamType::String, body).ok()?.into_string()
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>, AbiError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| AbiError::Hex(e.to_string()))
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parses a `0x`-prefixed 20-byte address.
pub fn parse_address(raw: &str) -> Result<H160, AbiError> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| AbiError::Address(format!("missing 0x prefix: {}", raw)))?;
    if digits.len() != 40 {
        return Err(AbiError::Address(format!(
            "expected 40 hex digits, got {}",
            digits.len()
        )));
    }
    let bytes = hex::decode(digits).map_err(|e| AbiError::Address(e.to_string()))?;
    Ok(H160::from_slice(&bytes))
}

pub fn format_address(address: &H160) -> String {
    to_hex(address.as_bytes())
}

/// Converts a decimal token amount such as `"1"` or `"0.25"` into base units.
pub fn parse_units(amount: &str, decimals: u32) -> Result<U256, AbiError> {
    let amount = amount.trim();
    if amount.is_empty() || amount.starts_with('-') {
        return Err(AbiError::Amount(format!("'{}' is not a non-negative amount", amount)));
    }
    utils::parse_units(amount, decimals)
        .map(U256::from)
        .map_err(|e| AbiError::Amount(format!("{}: {}", amount, e)))
}

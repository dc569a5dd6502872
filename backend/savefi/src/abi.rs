//! Minimal Solidity ABI encoding for the handful of calls we make.
//!
//! Every argument we send is a static 32-byte word (address or uint256), so
//! calldata is the 4-byte selector followed by one word per argument.

use sha3::{Digest, Keccak256};

use crate::errors::{Result, SaveFiError};
use crate::primitives::Address;

pub const ALLOWANCE_SIGNATURE: &str = "allowance(address,address)";
pub const APPROVE_SIGNATURE: &str = "approve(address,uint256)";

/// A single static ABI argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(u128),
    /// `type(uint256).max`
    MaxUint,
}

impl AbiValue {
    fn encode(&self) -> String {
        match self {
            Self::Address(addr) => format!("{:0>64}", addr.hex_body()),
            Self::Uint(n) => format!("{n:064x}"),
            Self::MaxUint => "f".repeat(64),
        }
    }
}

/// A function call against a contract, identified by its canonical signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub signature: String,
    pub args: Vec<AbiValue>,
}

impl ContractCall {
    pub fn new(signature: impl Into<String>, args: Vec<AbiValue>) -> Self {
        Self {
            signature: signature.into(),
            args,
        }
    }

    /// Function name without the parameter list.
    pub fn name(&self) -> &str {
        self.signature
            .split_once('(')
            .map(|(name, _)| name)
            .unwrap_or(&self.signature)
    }

    /// `0x`-prefixed calldata.
    pub fn calldata(&self) -> String {
        let mut out = format!("0x{}", hex::encode(selector(&self.signature)));
        for arg in &self.args {
            out.push_str(&arg.encode());
        }
        out
    }
}

/// First four bytes of the Keccak-256 hash of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Decode a single uint256 return word.
///
/// Values above `u128::MAX` (notably an unlimited allowance) saturate, which
/// is all callers need for `>=` comparisons.
pub fn decode_uint_saturating(hex_word: &str) -> Result<u128> {
    let digits = hex_word.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Err(SaveFiError::MalformedResponse(
            "empty return data".to_string(),
        ));
    }
    if digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SaveFiError::MalformedResponse(format!(
            "not a uint256 word: {hex_word}"
        )));
    }

    let significant = digits.trim_start_matches('0');
    if significant.len() > 32 {
        return Ok(u128::MAX);
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| SaveFiError::MalformedResponse(format!("bad uint256 {hex_word}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: &str) -> Address {
        Address::parse(&format!("0x{:0>40}", last)).unwrap()
    }

    #[test]
    fn canonical_selectors() {
        assert_eq!(hex::encode(selector(APPROVE_SIGNATURE)), "095ea7b3");
        assert_eq!(hex::encode(selector(ALLOWANCE_SIGNATURE)), "dd62ed3e");
        assert_eq!(
            hex::encode(selector("transfer(address,uint256)")),
            "a9059cbb"
        );
    }

    #[test]
    fn approve_calldata_layout() {
        let call = ContractCall::new(
            APPROVE_SIGNATURE,
            vec![AbiValue::Address(addr("beef")), AbiValue::MaxUint],
        );
        let data = call.calldata();
        assert_eq!(data.len(), 2 + 8 + 64 * 2);
        assert!(data.starts_with("0x095ea7b3"));
        assert!(data[10..74].ends_with("beef"));
        assert_eq!(&data[74..], "f".repeat(64));
        assert_eq!(call.name(), "approve");
    }

    #[test]
    fn uint_words_are_left_padded() {
        let call = ContractCall::new(
            "startDeposit(uint256,uint256)",
            vec![AbiValue::Uint(438_000_000), AbiValue::Uint(720)],
        );
        let data = call.calldata();
        assert!(data[10..74].ends_with("1a1b5980"));
        assert!(data[74..].ends_with("2d0"));
    }

    #[test]
    fn decode_words() {
        assert!(decode_uint_saturating("0x").is_err());
        assert_eq!(decode_uint_saturating(&format!("0x{:064x}", 5_000_000u64)).unwrap(), 5_000_000);
        assert_eq!(decode_uint_saturating(&format!("0x{}", "0".repeat(64))).unwrap(), 0);
        assert_eq!(
            decode_uint_saturating(&format!("0x{}", "f".repeat(64))).unwrap(),
            u128::MAX
        );
        assert!(decode_uint_saturating("0xzz").is_err());
    }
}

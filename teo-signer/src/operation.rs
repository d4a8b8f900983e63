//! Authorized operations and their packed parameter encoding
//!
//! Amounts are encoded as 256-bit big-endian integers in 18-decimal base
//! units, addresses as their 20 raw bytes, identifiers as 256-bit integers.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;

use crate::error::{SignerError, SignerResult};

/// Decimals of the external token
pub const TOKEN_DECIMALS: u32 = 18;

/// An operation a party can approve by signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizedOperation {
    /// Move `amount` from available to staked
    Stake { amount: Decimal },
    /// Move `amount` from staked to available
    Unstake { amount: Decimal },
    /// Spend `teo_cost` on a discount for `course_id` taught by `teacher`
    DiscountRedemption {
        teacher: Address,
        course_id: u64,
        course_price: Decimal,
        discount_percentage: u32,
        teo_cost: Decimal,
    },
}

impl AuthorizedOperation {
    /// Wire tag, first byte of the parameter block
    pub fn tag(&self) -> u8 {
        match self {
            Self::Stake { .. } => 0x01,
            Self::Unstake { .. } => 0x02,
            Self::DiscountRedemption { .. } => 0x03,
        }
    }

    /// Operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stake { .. } => "stake",
            Self::Unstake { .. } => "unstake",
            Self::DiscountRedemption { .. } => "discount_redemption",
        }
    }

    /// Append the packed parameters to `out`
    pub fn encode_params(&self, out: &mut Vec<u8>) -> SignerResult<()> {
        match self {
            Self::Stake { amount } | Self::Unstake { amount } => {
                out.extend_from_slice(&to_base_units(*amount)?.to_be_bytes::<32>());
            }
            Self::DiscountRedemption {
                teacher,
                course_id,
                course_price,
                discount_percentage,
                teo_cost,
            } => {
                out.extend_from_slice(teacher.as_slice());
                out.extend_from_slice(&U256::from(*course_id).to_be_bytes::<32>());
                out.extend_from_slice(&to_base_units(*course_price)?.to_be_bytes::<32>());
                out.extend_from_slice(&U256::from(*discount_percentage).to_be_bytes::<32>());
                out.extend_from_slice(&to_base_units(*teo_cost)?.to_be_bytes::<32>());
            }
        }
        Ok(())
    }
}

/// Convert a decimal amount into exact 18-decimal base units
pub fn to_base_units(amount: Decimal) -> SignerResult<U256> {
    if amount.is_sign_negative() {
        return Err(SignerError::Encoding(format!("negative amount {}", amount)));
    }
    let scale = amount.scale();
    if scale > TOKEN_DECIMALS {
        return Err(SignerError::Encoding(format!(
            "amount {} has more than {} decimals",
            amount, TOKEN_DECIMALS
        )));
    }
    let mantissa = amount.mantissa().unsigned_abs();
    let factor = U256::from(10u64).pow(U256::from(TOKEN_DECIMALS - scale));
    Ok(U256::from(mantissa) * factor)
}

/// Admission checks for incoming order requests
///
/// Requests that fail here are rejected at `add_order` with
/// `EngineError::InvalidOrder` and never enter the queue.
use crate::domain::OrderRequest;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;

/// Maximum length of identity and asset identifiers
const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate an order request before it is queued
///
/// # Arguments
/// * `request` - Request to validate
/// * `fee_rate` - Configured fee rate; the fee must be computable without overflow
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(InvalidOrder)` if invalid
pub fn validate_order(request: &OrderRequest, fee_rate: Decimal) -> Result<()> {
    if let Some(id) = &request.id {
        validate_identifier(id.as_str(), "id")?;
    }
    validate_identifier(&request.requester, "requester")?;
    validate_identifier(&request.input_asset, "input_asset")?;
    validate_identifier(&request.output_asset, "output_asset")?;

    if request.input_asset.trim() == request.output_asset.trim() {
        return Err(EngineError::InvalidOrder(format!(
            "input_asset and output_asset must differ (both {})",
            request.input_asset
        )));
    }

    validate_amount(request.input_amount, fee_rate)?;

    if request.min_output_amount < Decimal::ZERO {
        return Err(EngineError::InvalidOrder(format!(
            "min_output_amount cannot be negative: {}",
            request.min_output_amount
        )));
    }

    Ok(())
}

/// Validate the offered input amount
///
/// Must be positive and small enough that `amount * fee_rate` fits a Decimal.
pub fn validate_amount(amount: Decimal, fee_rate: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidOrder(format!(
            "input_amount must be positive: {}",
            amount
        )));
    }

    if amount.checked_mul(fee_rate).is_none() {
        return Err(EngineError::InvalidOrder(format!(
            "input_amount {} overflows fee computation",
            amount
        )));
    }

    Ok(())
}

/// Validate a non-empty identifier of bounded length
pub fn validate_identifier(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidOrder(format!(
            "{} cannot be empty",
            field_name
        )));
    }

    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(EngineError::InvalidOrder(format!(
            "{} too long: {} bytes (max {})",
            field_name,
            value.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    Ok(())
}

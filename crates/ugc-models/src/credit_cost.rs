//! Credit prices for billable operations.

/// Credits charged per generation attempt (initial script generation or a retry).
pub const GENERATION_CREDIT_COST: u32 = 1;

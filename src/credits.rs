use uuid::Uuid;

use crate::{
    error::ApiError,
    store::{CreditStore, StoreError, TransactionReason},
};

/// Paid image operations and their credit costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upscale,
    BackgroundRemoval,
    Vectorization,
    AiGeneration,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upscale => "upscale",
            Operation::BackgroundRemoval => "background-removal",
            Operation::Vectorization => "vectorization",
            Operation::AiGeneration => "ai-generation",
        }
    }

    pub fn cost(self) -> i64 {
        match self {
            Operation::Upscale | Operation::BackgroundRemoval => 1,
            Operation::Vectorization => 2,
            Operation::AiGeneration => 3,
        }
    }
}

/// Receipt for a debit taken before the paid work ran. Held so the handler can
/// refund if the provider call fails.
#[derive(Debug, Clone, Copy)]
pub struct Charge {
    pub operation: Operation,
    pub cost: i64,
    pub admin_bypass: bool,
    pub balance_after: i64,
}

/// Debits the operation cost up front with a single conditional decrement.
/// Either the full cost comes off an exactly-sufficient-or-better balance, or
/// nothing is written and the caller gets `insufficient_credits` before any
/// paid work starts. Admins are not charged.
pub async fn charge_for_operation(
    store: &dyn CreditStore,
    user_id: Uuid,
    operation: Operation,
) -> Result<Charge, ApiError> {
    let cost = operation.cost();

    if store.is_admin(user_id).await? {
        return Ok(Charge {
            operation,
            cost: 0,
            admin_bypass: true,
            balance_after: 0,
        });
    }

    let outcome = store
        .apply_credits(user_id, -cost, TransactionReason::UsageDebit, None)
        .await
        .map_err(|error| match error {
            StoreError::InsufficientCredits => ApiError::InsufficientCredits { required: cost },
            other => ApiError::from(other),
        })?;

    Ok(Charge {
        operation,
        cost,
        admin_bypass: false,
        balance_after: outcome.balance,
    })
}

/// Returns the debited cost after a failed paid operation. No-op for admin
/// bypass charges.
pub async fn refund_charge(
    store: &dyn CreditStore,
    user_id: Uuid,
    charge: &Charge,
) -> Result<(), StoreError> {
    if charge.admin_bypass || charge.cost == 0 {
        return Ok(());
    }
    store
        .apply_credits(user_id, charge.cost, TransactionReason::Refund, None)
        .await?;
    Ok(())
}

mod memory;
mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionReason {
    Signup,
    Purchase,
    SubscriptionRenewal,
    UsageDebit,
    AdminAdjustment,
    Refund,
}

impl TransactionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionReason::Signup => "signup",
            TransactionReason::Purchase => "purchase",
            TransactionReason::SubscriptionRenewal => "subscription_renewal",
            TransactionReason::UsageDebit => "usage_debit",
            TransactionReason::AdminAdjustment => "admin_adjustment",
            TransactionReason::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub credits: i64,
    pub subscription_plan: String,
    pub subscription_status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub user_id: Uuid,
    pub delta: i64,
    pub reason: TransactionReason,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of an atomic balance mutation. `applied` is false when an idempotency
/// key (`payment_ref`) had already been recorded; the balance is untouched then.
#[derive(Debug, Clone, Copy)]
pub struct CreditOutcome {
    pub applied: bool,
    pub balance: i64,
}

/// Partial profile update issued by the webhook handler. Outer `None` fields
/// are left as they are; the nullable columns take `Some(None)` to be cleared.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_subscription_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffiliateStatus {
    Pending,
    Approved,
    Rejected,
}

impl AffiliateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AffiliateStatus::Pending => "pending",
            AffiliateStatus::Approved => "approved",
            AffiliateStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Affiliate {
    pub user_id: Uuid,
    pub status: AffiliateStatus,
    pub referral_code: String,
    pub commission_rate_onetime: f64,
    pub commission_rate_recurring: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    SignedUp,
    Converted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub affiliate_user_id: Uuid,
    pub referred_user_id: Uuid,
    pub status: ReferralStatus,
}

/// `amount_cents` is the commission owed to the affiliate, already multiplied
/// out from the payment amount; `rate` is kept for the audit trail.
#[derive(Debug, Clone)]
pub struct NewCommission {
    pub affiliate_user_id: Uuid,
    pub referred_user_id: Uuid,
    pub amount_cents: i64,
    pub rate: f64,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AffiliateSummary {
    pub referral_count: i64,
    pub converted_count: i64,
    pub total_commission_cents: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("profile not found")]
    NotFound,
    #[error("store request failed: {0}")]
    Unavailable(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Narrow repository interface over the profiles/credit_transactions tables
/// (plus the affiliate tables). Every balance-affecting method pairs the
/// balance update with its ledger row in one atomic operation; the balance
/// column is authoritative and the ledger is the audit trail.
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;

    async fn find_profile_by_customer(&self, customer_id: &str)
        -> StoreResult<Option<Profile>>;

    /// Creates the profile with the signup grant and its ledger row. Returns
    /// the existing profile unchanged when one is already present.
    async fn create_profile(
        &self,
        user_id: Uuid,
        email: &str,
        signup_credits: i64,
    ) -> StoreResult<Profile>;

    /// Applies a signed delta atomically. Fails with `InsufficientCredits`
    /// (writing nothing) when the delta would drive the balance negative.
    /// A `payment_ref` makes the call idempotent under redelivery.
    async fn apply_credits(
        &self,
        user_id: Uuid,
        delta: i64,
        reason: TransactionReason,
        payment_ref: Option<&str>,
    ) -> StoreResult<CreditOutcome>;

    /// Newest first.
    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<CreditTransaction>>;

    async fn sync_subscription(
        &self,
        user_id: Uuid,
        update: SubscriptionUpdate,
    ) -> StoreResult<()>;

    async fn set_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> StoreResult<()>;

    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool>;

    async fn create_affiliate(&self, affiliate: Affiliate) -> StoreResult<()>;

    async fn get_affiliate_for_user(&self, user_id: Uuid) -> StoreResult<Option<Affiliate>>;

    async fn get_affiliate_by_code(&self, code: &str) -> StoreResult<Option<Affiliate>>;

    async fn set_affiliate_status(
        &self,
        user_id: Uuid,
        status: AffiliateStatus,
    ) -> StoreResult<()>;

    async fn record_referral(&self, referral: Referral) -> StoreResult<()>;

    async fn referral_for_user(&self, referred_user_id: Uuid) -> StoreResult<Option<Referral>>;

    /// Inserts the commission row and flips the referral to `converted` in the
    /// same operation. Idempotent per `payment_ref`: a commission already
    /// recorded for the same payment is not inserted again.
    async fn record_commission(&self, commission: NewCommission) -> StoreResult<()>;

    async fn affiliate_summary(&self, user_id: Uuid) -> StoreResult<AffiliateSummary>;
}

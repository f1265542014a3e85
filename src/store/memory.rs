use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    Affiliate, AffiliateStatus, AffiliateSummary, CreditOutcome, CreditStore, CreditTransaction,
    NewCommission, Profile, Referral, ReferralStatus, StoreError, StoreResult,
    SubscriptionUpdate, TransactionReason,
};

#[derive(Default)]
struct Inner {
    profiles: HashMap<Uuid, Profile>,
    transactions: Vec<CreditTransaction>,
    applied_refs: HashSet<String>,
    affiliates: HashMap<Uuid, Affiliate>,
    referrals: HashMap<Uuid, Referral>,
    commissions: Vec<NewCommission>,
}

/// In-memory store. Used as the dev-mode fallback when SUPABASE_URL is not
/// configured, and by the test suite. Mutations take the single lock, so the
/// conditional-decrement semantics match the SQL functions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/dev helper: inserts a profile as-is, without a ledger row.
    pub fn seed_profile(&self, profile: Profile) {
        self.inner.lock().profiles.insert(profile.id, profile);
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.inner.lock().profiles.get(&user_id).cloned())
    }

    async fn find_profile_by_customer(
        &self,
        customer_id: &str,
    ) -> StoreResult<Option<Profile>> {
        Ok(self
            .inner
            .lock()
            .profiles
            .values()
            .find(|profile| profile.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn create_profile(
        &self,
        user_id: Uuid,
        email: &str,
        signup_credits: i64,
    ) -> StoreResult<Profile> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.profiles.get(&user_id) {
            return Ok(existing.clone());
        }

        let profile = Profile {
            id: user_id,
            email: email.to_string(),
            credits: signup_credits,
            subscription_plan: "free".to_string(),
            subscription_status: "inactive".to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            current_period_end: None,
            is_admin: false,
        };
        inner.profiles.insert(user_id, profile.clone());
        if signup_credits > 0 {
            inner.transactions.push(CreditTransaction {
                user_id,
                delta: signup_credits,
                reason: TransactionReason::Signup,
                payment_ref: None,
                created_at: Utc::now(),
            });
        }
        Ok(profile)
    }

    async fn apply_credits(
        &self,
        user_id: Uuid,
        delta: i64,
        reason: TransactionReason,
        payment_ref: Option<&str>,
    ) -> StoreResult<CreditOutcome> {
        let mut inner = self.inner.lock();

        if let Some(reference) = payment_ref {
            if inner.applied_refs.contains(reference) {
                let balance = inner
                    .profiles
                    .get(&user_id)
                    .map(|profile| profile.credits)
                    .ok_or(StoreError::NotFound)?;
                return Ok(CreditOutcome {
                    applied: false,
                    balance,
                });
            }
        }

        let profile = inner.profiles.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        let next = profile.credits + delta;
        if next < 0 {
            return Err(StoreError::InsufficientCredits);
        }
        profile.credits = next;

        inner.transactions.push(CreditTransaction {
            user_id,
            delta,
            reason,
            payment_ref: payment_ref.map(str::to_string),
            created_at: Utc::now(),
        });
        if let Some(reference) = payment_ref {
            inner.applied_refs.insert(reference.to_string());
        }

        Ok(CreditOutcome {
            applied: true,
            balance: next,
        })
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<CreditTransaction>> {
        let inner = self.inner.lock();
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn sync_subscription(
        &self,
        user_id: Uuid,
        update: SubscriptionUpdate,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let profile = inner.profiles.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        if let Some(plan) = update.subscription_plan {
            profile.subscription_plan = plan;
        }
        if let Some(status) = update.subscription_status {
            profile.subscription_status = status;
        }
        if let Some(subscription_id) = update.stripe_subscription_id {
            profile.stripe_subscription_id = subscription_id;
        }
        if let Some(period_end) = update.current_period_end {
            profile.current_period_end = period_end;
        }
        Ok(())
    }

    async fn set_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let profile = inner.profiles.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        profile.stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .profiles
            .get(&user_id)
            .map(|profile| profile.is_admin)
            .unwrap_or(false))
    }

    async fn create_affiliate(&self, affiliate: Affiliate) -> StoreResult<()> {
        self.inner
            .lock()
            .affiliates
            .insert(affiliate.user_id, affiliate);
        Ok(())
    }

    async fn get_affiliate_for_user(&self, user_id: Uuid) -> StoreResult<Option<Affiliate>> {
        Ok(self.inner.lock().affiliates.get(&user_id).cloned())
    }

    async fn get_affiliate_by_code(&self, code: &str) -> StoreResult<Option<Affiliate>> {
        Ok(self
            .inner
            .lock()
            .affiliates
            .values()
            .find(|affiliate| affiliate.referral_code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn set_affiliate_status(
        &self,
        user_id: Uuid,
        status: AffiliateStatus,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let affiliate = inner.affiliates.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        affiliate.status = status;
        Ok(())
    }

    async fn record_referral(&self, referral: Referral) -> StoreResult<()> {
        self.inner
            .lock()
            .referrals
            .insert(referral.referred_user_id, referral);
        Ok(())
    }

    async fn referral_for_user(
        &self,
        referred_user_id: Uuid,
    ) -> StoreResult<Option<Referral>> {
        Ok(self.inner.lock().referrals.get(&referred_user_id).cloned())
    }

    async fn record_commission(&self, commission: NewCommission) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(reference) = commission.payment_ref.as_deref() {
            let seen = inner
                .commissions
                .iter()
                .any(|existing| existing.payment_ref.as_deref() == Some(reference));
            if seen {
                return Ok(());
            }
        }
        if let Some(referral) = inner.referrals.get_mut(&commission.referred_user_id) {
            referral.status = ReferralStatus::Converted;
        }
        inner.commissions.push(commission);
        Ok(())
    }

    async fn affiliate_summary(&self, user_id: Uuid) -> StoreResult<AffiliateSummary> {
        let inner = self.inner.lock();
        let referral_count = inner
            .referrals
            .values()
            .filter(|referral| referral.affiliate_user_id == user_id)
            .count() as i64;
        let converted_count = inner
            .referrals
            .values()
            .filter(|referral| {
                referral.affiliate_user_id == user_id
                    && referral.status == ReferralStatus::Converted
            })
            .count() as i64;
        let total_commission_cents = inner
            .commissions
            .iter()
            .filter(|commission| commission.affiliate_user_id == user_id)
            .map(|commission| commission.amount_cents)
            .sum();

        Ok(AffiliateSummary {
            referral_count,
            converted_count,
            total_commission_cents,
        })
    }
}

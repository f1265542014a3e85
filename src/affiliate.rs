use uuid::Uuid;

use crate::store::{
    Affiliate, AffiliateStatus, CreditStore, NewCommission, ReferralStatus, StoreResult,
};

pub const DEFAULT_RATE_ONETIME: f64 = 0.20;
pub const DEFAULT_RATE_RECURRING: f64 = 0.20;

/// Referral codes are the email local-part (letters/digits, uppercased, first
/// six) plus a random six-hex-digit suffix. 16^6 suffixes per prefix keeps
/// collisions on the unique referral_code index out of practical reach.
pub fn generate_referral_code(email: &str) -> String {
    let local_part = email.split('@').next().unwrap_or(email);
    let prefix: String = local_part
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    let prefix = if prefix.is_empty() {
        "REF".to_string()
    } else {
        prefix
    };
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("{}{}", prefix, suffix)
}

pub fn new_application(user_id: Uuid, email: &str) -> Affiliate {
    Affiliate {
        user_id,
        status: AffiliateStatus::Pending,
        referral_code: generate_referral_code(email),
        commission_rate_onetime: DEFAULT_RATE_ONETIME,
        commission_rate_recurring: DEFAULT_RATE_RECURRING,
    }
}

/// Records a commission for the referring affiliate when a referred user pays.
/// No-op when the payer was not referred, or the affiliate is no longer
/// approved. The first conversion flips the referral to `converted`.
pub async fn record_conversion(
    store: &dyn CreditStore,
    payer_user_id: Uuid,
    payment_amount_cents: i64,
    recurring: bool,
    payment_ref: Option<&str>,
) -> StoreResult<()> {
    let referral = match store.referral_for_user(payer_user_id).await? {
        Some(referral) => referral,
        None => return Ok(()),
    };

    let affiliate = match store
        .get_affiliate_for_user(referral.affiliate_user_id)
        .await?
    {
        Some(affiliate) if affiliate.status == AffiliateStatus::Approved => affiliate,
        _ => return Ok(()),
    };

    let rate = if recurring {
        affiliate.commission_rate_recurring
    } else {
        affiliate.commission_rate_onetime
    };
    let amount_cents = (payment_amount_cents as f64 * rate).round() as i64;
    if amount_cents <= 0 {
        return Ok(());
    }

    store
        .record_commission(NewCommission {
            affiliate_user_id: affiliate.user_id,
            referred_user_id: payer_user_id,
            amount_cents,
            rate,
            payment_ref: payment_ref.map(str::to_string),
        })
        .await?;

    if referral.status == ReferralStatus::SignedUp {
        tracing::info!(
            affiliate = %affiliate.user_id,
            referred = %payer_user_id,
            "referral converted"
        );
    }

    Ok(())
}

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{
    Affiliate, AffiliateStatus, AffiliateSummary, CreditOutcome, CreditStore, CreditTransaction,
    NewCommission, Profile, Referral, StoreError, StoreResult, SubscriptionUpdate,
    TransactionReason,
};

/// Thin PostgREST client over the Supabase-hosted tables. Single-row reads and
/// partial updates go straight to the REST surface; every multi-step mutation
/// goes through an SQL function (see migrations/0001_credit_system.sql) so the
/// balance update and its ledger row commit in one transaction.
#[derive(Clone)]
pub struct SupabaseStore {
    base_url: String,
    http: reqwest::Client,
}

impl SupabaseStore {
    pub fn new(base_url: String, service_role_key: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(service_role_key).context("invalid Supabase service key")?,
        );
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", service_role_key))
                .context("invalid Supabase service key")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create Supabase HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let response = self
            .http
            .get(self.rest_url(table))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Supabase select failed for {table}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read Supabase response for {table}"))?;

        if !status.is_success() {
            return Err(StoreError::Unavailable(anyhow!(
                "Supabase select {} returned {}: {}",
                table,
                status,
                body
            )));
        }

        serde_json::from_str(&body)
            .with_context(|| format!("failed to decode Supabase rows for {table}"))
            .map_err(StoreError::Unavailable)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Option<T>> {
        let mut rows = self.select::<T>(table, query).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn patch(&self, table: &str, query: &[(&str, String)], body: Value) -> StoreResult<()> {
        let response = self
            .http
            .patch(self.rest_url(table))
            .header("Prefer", "return=minimal")
            .query(query)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Supabase update failed for {table}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(anyhow!(
                "Supabase update {} returned {}: {}",
                table,
                status,
                body
            )));
        }
        Ok(())
    }

    async fn insert(&self, table: &str, body: Value) -> StoreResult<()> {
        let response = self
            .http
            .post(self.rest_url(table))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Supabase insert failed for {table}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(anyhow!(
                "Supabase insert {} returned {}: {}",
                table,
                status,
                body
            )));
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> StoreResult<Value> {
        let response = self
            .http
            .post(self.rest_url(&format!("rpc/{function}")))
            .json(&args)
            .send()
            .await
            .with_context(|| format!("Supabase rpc failed for {function}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read Supabase rpc response for {function}"))?;

        if !status.is_success() {
            return Err(StoreError::Unavailable(anyhow!(
                "Supabase rpc {} returned {}: {}",
                function,
                status,
                body
            )));
        }

        serde_json::from_str(&body)
            .with_context(|| format!("failed to decode Supabase rpc result for {function}"))
            .map_err(StoreError::Unavailable)
    }
}

fn eq(value: impl ToString) -> String {
    format!("eq.{}", value.to_string())
}

#[async_trait]
impl CreditStore for SupabaseStore {
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        self.select_one(
            "profiles",
            &[("id", eq(user_id)), ("select", "*".to_string())],
        )
        .await
    }

    async fn find_profile_by_customer(
        &self,
        customer_id: &str,
    ) -> StoreResult<Option<Profile>> {
        self.select_one(
            "profiles",
            &[
                ("stripe_customer_id", eq(customer_id)),
                ("select", "*".to_string()),
            ],
        )
        .await
    }

    async fn create_profile(
        &self,
        user_id: Uuid,
        email: &str,
        signup_credits: i64,
    ) -> StoreResult<Profile> {
        let value = self
            .rpc(
                "create_profile_with_grant",
                json!({
                    "p_user_id": user_id,
                    "p_email": email,
                    "p_credits": signup_credits,
                }),
            )
            .await?;

        serde_json::from_value(value)
            .context("failed to decode created profile")
            .map_err(StoreError::Unavailable)
    }

    async fn apply_credits(
        &self,
        user_id: Uuid,
        delta: i64,
        reason: TransactionReason,
        payment_ref: Option<&str>,
    ) -> StoreResult<CreditOutcome> {
        let value = self
            .rpc(
                "apply_credits",
                json!({
                    "p_user_id": user_id,
                    "p_delta": delta,
                    "p_reason": reason.as_str(),
                    "p_payment_ref": payment_ref,
                }),
            )
            .await?;

        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let balance = value.get("balance").and_then(Value::as_i64).unwrap_or(0);

        match status {
            "applied" => Ok(CreditOutcome {
                applied: true,
                balance,
            }),
            "duplicate" => Ok(CreditOutcome {
                applied: false,
                balance,
            }),
            "insufficient" => Err(StoreError::InsufficientCredits),
            "missing" => Err(StoreError::NotFound),
            other => Err(StoreError::Unavailable(anyhow!(
                "apply_credits returned unknown status: {}",
                other
            ))),
        }
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<CreditTransaction>> {
        self.select(
            "credit_transactions",
            &[
                ("user_id", eq(user_id)),
                ("select", "user_id,delta,reason,payment_ref,created_at".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn sync_subscription(
        &self,
        user_id: Uuid,
        update: SubscriptionUpdate,
    ) -> StoreResult<()> {
        let body = serde_json::to_value(&update)
            .context("failed to encode subscription update")
            .map_err(StoreError::Unavailable)?;
        if body.as_object().map(|map| map.is_empty()).unwrap_or(true) {
            return Ok(());
        }
        self.patch("profiles", &[("id", eq(user_id))], body).await
    }

    async fn set_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> StoreResult<()> {
        self.patch(
            "profiles",
            &[("id", eq(user_id))],
            json!({ "stripe_customer_id": customer_id }),
        )
        .await
    }

    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool> {
        #[derive(serde::Deserialize)]
        struct AdminRow {
            is_admin: bool,
        }

        let row: Option<AdminRow> = self
            .select_one(
                "profiles",
                &[("id", eq(user_id)), ("select", "is_admin".to_string())],
            )
            .await?;
        Ok(row.map(|row| row.is_admin).unwrap_or(false))
    }

    async fn create_affiliate(&self, affiliate: Affiliate) -> StoreResult<()> {
        self.insert(
            "affiliates",
            json!({
                "user_id": affiliate.user_id,
                "status": affiliate.status.as_str(),
                "referral_code": affiliate.referral_code,
                "commission_rate_onetime": affiliate.commission_rate_onetime,
                "commission_rate_recurring": affiliate.commission_rate_recurring,
            }),
        )
        .await
    }

    async fn get_affiliate_for_user(&self, user_id: Uuid) -> StoreResult<Option<Affiliate>> {
        self.select_one(
            "affiliates",
            &[("user_id", eq(user_id)), ("select", "*".to_string())],
        )
        .await
    }

    async fn get_affiliate_by_code(&self, code: &str) -> StoreResult<Option<Affiliate>> {
        self.select_one(
            "affiliates",
            &[
                ("referral_code", format!("eq.{}", code.to_uppercase())),
                ("select", "*".to_string()),
            ],
        )
        .await
    }

    async fn set_affiliate_status(
        &self,
        user_id: Uuid,
        status: AffiliateStatus,
    ) -> StoreResult<()> {
        self.patch(
            "affiliates",
            &[("user_id", eq(user_id))],
            json!({ "status": status.as_str() }),
        )
        .await
    }

    async fn record_referral(&self, referral: Referral) -> StoreResult<()> {
        self.insert(
            "referrals",
            json!({
                "affiliate_user_id": referral.affiliate_user_id,
                "referred_user_id": referral.referred_user_id,
                "status": "signed_up",
            }),
        )
        .await
    }

    async fn referral_for_user(
        &self,
        referred_user_id: Uuid,
    ) -> StoreResult<Option<Referral>> {
        self.select_one(
            "referrals",
            &[
                ("referred_user_id", eq(referred_user_id)),
                (
                    "select",
                    "affiliate_user_id,referred_user_id,status".to_string(),
                ),
            ],
        )
        .await
    }

    async fn record_commission(&self, commission: NewCommission) -> StoreResult<()> {
        self.rpc(
            "record_commission",
            json!({
                "p_affiliate_user_id": commission.affiliate_user_id,
                "p_referred_user_id": commission.referred_user_id,
                "p_amount_cents": commission.amount_cents,
                "p_rate": commission.rate,
                "p_payment_ref": commission.payment_ref,
            }),
        )
        .await?;
        Ok(())
    }

    async fn affiliate_summary(&self, user_id: Uuid) -> StoreResult<AffiliateSummary> {
        #[derive(serde::Deserialize)]
        struct ReferralRow {
            status: super::ReferralStatus,
        }
        #[derive(serde::Deserialize)]
        struct CommissionRow {
            amount_cents: i64,
        }

        let referrals: Vec<ReferralRow> = self
            .select(
                "referrals",
                &[
                    ("affiliate_user_id", eq(user_id)),
                    ("select", "status".to_string()),
                ],
            )
            .await?;
        let commissions: Vec<CommissionRow> = self
            .select(
                "commissions",
                &[
                    ("affiliate_user_id", eq(user_id)),
                    ("select", "amount_cents".to_string()),
                ],
            )
            .await?;

        Ok(AffiliateSummary {
            referral_count: referrals.len() as i64,
            converted_count: referrals
                .iter()
                .filter(|row| row.status == super::ReferralStatus::Converted)
                .count() as i64,
            total_commission_cents: commissions.iter().map(|row| row.amount_cents).sum(),
        })
    }
}

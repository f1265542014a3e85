use axum::{
    body::Bytes,
    extract::{Extension, Json, Path as AxumPath, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    affiliate,
    credits::{charge_for_operation, refund_charge, Charge, Operation},
    error::ApiError,
    middleware::AuthenticatedUser,
    plans::{
        is_subscription_active, plan_definition, resolve_plan_id, PlanId, PriceTarget,
        SIGNUP_CREDITS,
    },
    processing::ProcessedOutput,
    state::AppState,
    store::{
        AffiliateStatus, Referral, ReferralStatus, SubscriptionUpdate, TransactionReason,
    },
    stripe_api::{
        CheckoutMode, StripeCheckoutSession, StripeEvent, StripeInvoice, StripePaymentIntent,
        StripeSubscription,
    },
};

const TRANSACTION_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SignupCompleteRequest {
    #[serde(rename = "referralCode")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(rename = "priceId")]
    pub price_id: Option<String>,
    #[serde(rename = "successUrl")]
    pub success_url: Option<String>,
    #[serde(rename = "cancelUrl")]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpscaleRequest {
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    pub scale: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ImageUrlRequest {
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminCreditAdjustment {
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct AffiliateReview {
    pub approve: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserIdPath {
    pub id: Uuid,
}

pub async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Called by the frontend once after Supabase signup. Creates the profile with
/// the signup grant; re-posting is harmless because an existing profile is
/// returned unchanged. A valid referral code links the new user to its
/// affiliate.
pub async fn signup_complete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SignupCompleteRequest>,
) -> Result<Response, ApiError> {
    let email = user
        .email
        .clone()
        .ok_or_else(|| ApiError::BadRequest("Token is missing an email claim.".to_string()))?;

    let profile = state
        .store
        .create_profile(user.user_id, &email, SIGNUP_CREDITS)
        .await?;

    if let Some(code) = request
        .referral_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
    {
        match state.store.get_affiliate_by_code(code).await? {
            Some(affiliate)
                if affiliate.status == AffiliateStatus::Approved
                    && affiliate.user_id != user.user_id =>
            {
                state
                    .store
                    .record_referral(Referral {
                        affiliate_user_id: affiliate.user_id,
                        referred_user_id: user.user_id,
                        status: ReferralStatus::SignedUp,
                    })
                    .await?;
            }
            _ => {
                tracing::warn!(code = %code, "ignoring unknown or inactive referral code");
            }
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "profile": profile,
        })),
    )
        .into_response())
}

pub async fn get_credits(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let profile = state
        .store
        .get_profile(user.user_id)
        .await?
        .ok_or(ApiError::NotFound("Profile not found."))?;

    let transactions = state
        .store
        .list_transactions(user.user_id, TRANSACTION_PAGE_SIZE)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "credits": profile.credits,
            "transactions": transactions,
        })),
    )
        .into_response())
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let profile = state
        .store
        .get_profile(user.user_id)
        .await?
        .ok_or(ApiError::NotFound("Profile not found."))?;

    let plan_id = resolve_plan_id(Some(&profile.subscription_plan));
    let definition = plan_definition(plan_id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "plan": plan_id.as_str(),
            "status": profile.subscription_status,
            "active": is_subscription_active(Some(&profile.subscription_status)),
            "monthlyCredits": definition.monthly_credits,
            "currentPeriodEnd": profile.current_period_end,
        })),
    )
        .into_response())
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<Response, ApiError> {
    let price_id = request
        .price_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest("priceId is required.".to_string()))?;

    let target = state
        .price_map
        .target_for_price_id(Some(price_id))
        .ok_or_else(|| ApiError::BadRequest("Unknown priceId.".to_string()))?;

    let (mode, credits) = match target {
        PriceTarget::Plan(_) => (CheckoutMode::Subscription, None),
        PriceTarget::CreditPackage { credits } => (CheckoutMode::Payment, Some(credits)),
    };

    let profile = state
        .store
        .get_profile(user.user_id)
        .await?
        .ok_or(ApiError::NotFound("Profile not found."))?;

    let customer_id = match profile.stripe_customer_id {
        Some(customer_id) => customer_id,
        None => {
            let customer = state
                .stripe
                .create_customer(&profile.email, &user.user_id.to_string())
                .await
                .map_err(ApiError::Upstream)?;
            state
                .store
                .set_stripe_customer(user.user_id, &customer.id)
                .await?;
            customer.id
        }
    };

    let app_url = state.config.app_url.as_deref().unwrap_or("http://localhost:3000");
    let success_url = request
        .success_url
        .unwrap_or_else(|| format!("{}/dashboard?checkout=success", app_url));
    let cancel_url = request
        .cancel_url
        .unwrap_or_else(|| format!("{}/pricing?checkout=cancelled", app_url));

    let session = state
        .stripe
        .create_checkout_session(
            &customer_id,
            price_id,
            mode,
            &user.user_id.to_string(),
            credits,
            &success_url,
            &cancel_url,
        )
        .await
        .map_err(ApiError::Upstream)?;

    Ok((
        StatusCode::OK,
        Json(json!({ "sessionId": session.id, "url": session.url })),
    )
        .into_response())
}

pub async fn create_customer_portal_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let profile = state
        .store
        .get_profile(user.user_id)
        .await?
        .ok_or(ApiError::NotFound("Profile not found."))?;

    let customer_id = profile
        .stripe_customer_id
        .ok_or_else(|| ApiError::BadRequest("No billing account on file.".to_string()))?;

    let app_url = state.config.app_url.as_deref().unwrap_or("http://localhost:3000");
    let return_url = format!("{}/dashboard", app_url);

    let session = state
        .stripe
        .create_billing_portal_session(&customer_id, &return_url)
        .await
        .map_err(ApiError::Upstream)?;

    match session.url {
        Some(url) => Ok((StatusCode::OK, Json(json!({ "url": url }))).into_response()),
        None => Err(ApiError::Upstream(anyhow::anyhow!(
            "Stripe returned no portal URL"
        ))),
    }
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = match headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value,
        None => return ApiError::InvalidSignature.into_response(),
    };

    if let Err(error) = state.stripe.verify_webhook_signature(signature, &body) {
        tracing::error!(error = %error, "Stripe webhook signature verification failed");
        let message = error.to_string();
        if message.contains("STRIPE_WEBHOOK_SECRET") {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook not configured.").into_response();
        }
        return ApiError::InvalidSignature.into_response();
    }

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(error = %error, "invalid Stripe webhook payload");
            return ApiError::InvalidSignature.into_response();
        }
    };

    let result = match event.event_type.as_str() {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            match serde_json::from_value::<StripeSubscription>(event.data.object) {
                Ok(subscription) => {
                    let deleted = event.event_type == "customer.subscription.deleted";
                    sync_subscription_from_stripe(&state, subscription, deleted).await
                }
                Err(error) => {
                    tracing::error!(error = %error, "failed to decode subscription object");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.")
                        .into_response();
                }
            }
        }
        "invoice.payment_succeeded" | "invoice.payment_failed" => {
            match serde_json::from_value::<StripeInvoice>(event.data.object) {
                Ok(invoice) => {
                    let succeeded = event.event_type == "invoice.payment_succeeded";
                    handle_invoice(&state, invoice, succeeded).await
                }
                Err(error) => {
                    tracing::error!(error = %error, "failed to decode invoice object");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.")
                        .into_response();
                }
            }
        }
        "payment_intent.succeeded" => {
            match serde_json::from_value::<StripePaymentIntent>(event.data.object) {
                Ok(intent) => handle_payment_intent(&state, intent).await,
                Err(error) => {
                    tracing::error!(error = %error, "failed to decode payment intent object");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.")
                        .into_response();
                }
            }
        }
        "checkout.session.completed" => {
            match serde_json::from_value::<StripeCheckoutSession>(event.data.object) {
                Ok(session) => handle_checkout_completed(&state, session).await,
                Err(error) => {
                    tracing::error!(error = %error, "failed to decode checkout session object");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.")
                        .into_response();
                }
            }
        }
        other => {
            tracing::debug!(event_type = %other, "ignoring unhandled Stripe event");
            Ok(())
        }
    };

    match result {
        Ok(_) => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Stripe webhook handling failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.").into_response()
        }
    }
}

/// Finds the local user a Stripe customer belongs to. Prefers the profile row;
/// falls back to the `userId` metadata stamped on the customer at creation.
async fn user_for_customer(state: &AppState, customer_id: &str) -> anyhow::Result<Option<Uuid>> {
    if let Some(profile) = state.store.find_profile_by_customer(customer_id).await? {
        return Ok(Some(profile.id));
    }

    let customer = state.stripe.retrieve_customer(customer_id).await?;
    if customer.deleted {
        return Ok(None);
    }
    match customer.metadata.get("userId") {
        Some(raw) => Ok(Uuid::parse_str(raw).ok()),
        None => Ok(None),
    }
}

async fn sync_subscription_from_stripe(
    state: &AppState,
    subscription: StripeSubscription,
    deleted: bool,
) -> anyhow::Result<()> {
    let customer_id = subscription.customer.id();

    let user_id = match subscription
        .metadata
        .get("userId")
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        Some(user_id) => Some(user_id),
        None => user_for_customer(state, &customer_id).await?,
    };
    let user_id = match user_id {
        Some(value) => value,
        None => {
            tracing::warn!(customer_id = %customer_id, "Stripe webhook: no local user for customer");
            return Ok(());
        }
    };

    let update = if deleted {
        SubscriptionUpdate {
            subscription_plan: Some(PlanId::Free.as_str().to_string()),
            subscription_status: Some("canceled".to_string()),
            stripe_subscription_id: Some(None),
            current_period_end: Some(None),
        }
    } else {
        let plan_id = match state.price_map.plan_for_price_id(subscription.price_id()) {
            Some(plan_id) => plan_id,
            None => {
                tracing::warn!(
                    price_id = ?subscription.price_id(),
                    "Stripe webhook: unable to resolve plan for price"
                );
                return Ok(());
            }
        };

        SubscriptionUpdate {
            subscription_plan: Some(plan_id.as_str().to_string()),
            subscription_status: Some(subscription.status.clone()),
            stripe_subscription_id: Some(Some(subscription.id.clone())),
            current_period_end: subscription
                .current_period_end
                .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
                .map(Some),
        }
    };

    state.store.sync_subscription(user_id, update).await?;
    Ok(())
}

/// Renewal invoices grant the plan's monthly credits, keyed on the invoice id
/// so a redelivered event cannot double-grant. The first period's credits come
/// from the checkout.session.completed grant; granting here only on
/// `subscription_cycle` keeps the two paths from overlapping.
async fn handle_invoice(
    state: &AppState,
    invoice: StripeInvoice,
    succeeded: bool,
) -> anyhow::Result<()> {
    let customer_id = match invoice.customer.as_ref() {
        Some(reference) => reference.id(),
        None => return Ok(()),
    };
    let user_id = match user_for_customer(state, &customer_id).await? {
        Some(value) => value,
        None => {
            tracing::warn!(customer_id = %customer_id, "Stripe webhook: no local user for invoice");
            return Ok(());
        }
    };

    if !succeeded {
        state
            .store
            .sync_subscription(
                user_id,
                SubscriptionUpdate {
                    subscription_status: Some("past_due".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        return Ok(());
    }

    if let Some(subscription_ref) = invoice.subscription.as_ref() {
        let subscription_id = subscription_ref.id();
        let subscription = state.stripe.retrieve_subscription(&subscription_id).await?;
        sync_subscription_from_stripe(state, subscription, false).await?;
    }

    if invoice.billing_reason.as_deref() == Some("subscription_cycle") {
        let profile = state.store.get_profile(user_id).await?;
        let plan_id = resolve_plan_id(
            profile
                .as_ref()
                .map(|profile| profile.subscription_plan.as_str()),
        );
        let monthly_credits = plan_definition(plan_id).monthly_credits;
        if monthly_credits > 0 {
            let outcome = state
                .store
                .apply_credits(
                    user_id,
                    monthly_credits,
                    TransactionReason::SubscriptionRenewal,
                    Some(&invoice.id),
                )
                .await?;
            if outcome.applied {
                tracing::info!(
                    user = %user_id,
                    credits = monthly_credits,
                    invoice = %invoice.id,
                    "renewal credits granted"
                );
            } else {
                tracing::info!(invoice = %invoice.id, "renewal invoice already processed");
            }
        }
    }

    if let Some(amount_paid) = invoice.amount_paid.filter(|amount| *amount > 0) {
        affiliate::record_conversion(
            state.store.as_ref(),
            user_id,
            amount_paid,
            true,
            Some(&invoice.id),
        )
        .await?;
    }

    Ok(())
}

/// One-time credit package purchase. The checkout session stamped the payment
/// intent with `userId` and `credits`; the intent id is the idempotency key.
async fn handle_payment_intent(
    state: &AppState,
    intent: StripePaymentIntent,
) -> anyhow::Result<()> {
    let user_id = match intent
        .metadata
        .get("userId")
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        Some(value) => value,
        None => {
            tracing::debug!(intent = %intent.id, "payment intent without userId metadata");
            return Ok(());
        }
    };
    let credits = match intent
        .metadata
        .get("credits")
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|credits| *credits > 0)
    {
        Some(value) => value,
        None => {
            tracing::debug!(intent = %intent.id, "payment intent without credits metadata");
            return Ok(());
        }
    };

    let outcome = state
        .store
        .apply_credits(
            user_id,
            credits,
            TransactionReason::Purchase,
            Some(&intent.id),
        )
        .await?;
    if outcome.applied {
        tracing::info!(user = %user_id, credits, intent = %intent.id, "credit package granted");
    } else {
        tracing::info!(intent = %intent.id, "payment intent already processed");
    }

    if let Some(amount) = intent.amount.filter(|amount| *amount > 0) {
        affiliate::record_conversion(
            state.store.as_ref(),
            user_id,
            amount,
            false,
            Some(&intent.id),
        )
        .await?;
    }

    Ok(())
}

/// Settles a finished checkout. Subscription checkouts persist the Stripe
/// ids and grant the first period's credits, keyed on the session id.
/// Payment checkouts are a fallback for a missed or late payment_intent
/// event; the grant keys on the session's payment intent id, the same key
/// the payment_intent.succeeded path uses, so either arrival order grants
/// exactly once.
async fn handle_checkout_completed(
    state: &AppState,
    session: StripeCheckoutSession,
) -> anyhow::Result<()> {
    if session.status.as_deref() != Some("complete") {
        return Ok(());
    }

    let user_id = match session
        .metadata
        .get("userId")
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        Some(value) => value,
        None => return Ok(()),
    };

    if let Some(customer) = session.customer.as_ref() {
        // Tolerate events for users that no longer exist.
        match state.store.set_stripe_customer(user_id, &customer.id()).await {
            Ok(()) | Err(crate::store::StoreError::NotFound) => {}
            Err(error) => return Err(error.into()),
        }
    }

    match session.mode.as_deref() {
        Some("subscription") => {
            let subscription_ref = match session.subscription.as_ref() {
                Some(reference) => reference,
                None => return Ok(()),
            };
            let subscription = state
                .stripe
                .retrieve_subscription(&subscription_ref.id())
                .await?;
            sync_subscription_from_stripe(state, subscription.clone(), false).await?;

            let plan_id = match state.price_map.plan_for_price_id(subscription.price_id()) {
                Some(plan_id) => plan_id,
                None => return Ok(()),
            };
            let monthly_credits = plan_definition(plan_id).monthly_credits;
            if monthly_credits > 0 {
                let outcome = state
                    .store
                    .apply_credits(
                        user_id,
                        monthly_credits,
                        TransactionReason::Purchase,
                        Some(&session.id),
                    )
                    .await?;
                if outcome.applied {
                    tracing::info!(
                        user = %user_id,
                        credits = monthly_credits,
                        session = %session.id,
                        "first subscription period credits granted"
                    );
                }
            }
            Ok(())
        }
        Some("payment") => handle_payment_checkout(state, user_id, session).await,
        _ => Ok(()),
    }
}

async fn handle_payment_checkout(
    state: &AppState,
    user_id: Uuid,
    session: StripeCheckoutSession,
) -> anyhow::Result<()> {
    let credits = match session
        .metadata
        .get("credits")
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|credits| *credits > 0)
    {
        Some(value) => value,
        None => return Ok(()),
    };

    // Key on the intent id so this and payment_intent.succeeded dedupe
    // against each other; only sessions without an intent fall back to the
    // session id.
    let payment_ref = session
        .payment_intent
        .as_ref()
        .map(|reference| reference.id())
        .unwrap_or_else(|| session.id.clone());

    let outcome = state
        .store
        .apply_credits(
            user_id,
            credits,
            TransactionReason::Purchase,
            Some(&payment_ref),
        )
        .await?;
    if outcome.applied {
        tracing::info!(user = %user_id, credits, session = %session.id, "checkout credits granted");
    } else {
        tracing::info!(session = %session.id, "checkout payment already processed");
    }

    Ok(())
}

pub async fn upscale_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<UpscaleRequest>,
) -> Result<Response, ApiError> {
    let image_url = require_image_url(request.image_url)?;
    let scale = request.scale.unwrap_or(2).clamp(2, 4);

    let charge = charge_for_operation(state.store.as_ref(), user.user_id, Operation::Upscale)
        .await?;

    let result = state
        .run_processing_job("upscale", || async {
            state.processing.upscale(&image_url, scale).await
        })
        .await;

    finish_processing(&state, user.user_id, charge, result).await
}

pub async fn remove_background(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<ImageUrlRequest>,
) -> Result<Response, ApiError> {
    let image_url = require_image_url(request.image_url)?;

    let charge = charge_for_operation(
        state.store.as_ref(),
        user.user_id,
        Operation::BackgroundRemoval,
    )
    .await?;

    let result = state
        .run_processing_job("background-removal", || async {
            state.processing.remove_background(&image_url).await
        })
        .await;

    finish_processing(&state, user.user_id, charge, result).await
}

pub async fn vectorize_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<ImageUrlRequest>,
) -> Result<Response, ApiError> {
    let image_url = require_image_url(request.image_url)?;

    let charge = charge_for_operation(
        state.store.as_ref(),
        user.user_id,
        Operation::Vectorization,
    )
    .await?;

    let result = state
        .run_processing_job("vectorize", || async {
            state.processing.vectorize(&image_url).await
        })
        .await;

    finish_processing(&state, user.user_id, charge, result).await
}

pub async fn generate_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let prompt = request
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .ok_or_else(|| ApiError::BadRequest("prompt is required.".to_string()))?
        .to_string();
    let size = request.size.unwrap_or_else(|| "1024x1024".to_string());

    let charge = charge_for_operation(state.store.as_ref(), user.user_id, Operation::AiGeneration)
        .await?;

    let result = state
        .run_processing_job("generate", || async {
            state.processing.generate(&prompt, &size).await
        })
        .await;

    finish_processing(&state, user.user_id, charge, result).await
}

fn require_image_url(value: Option<String>) -> Result<String, ApiError> {
    value
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::BadRequest("imageUrl is required.".to_string()))
}

/// Turns a provider result into a response, returning the debited credits when
/// the provider call failed.
async fn finish_processing(
    state: &AppState,
    user_id: Uuid,
    charge: Charge,
    result: anyhow::Result<ProcessedOutput>,
) -> Result<Response, ApiError> {
    match result {
        Ok(ProcessedOutput::Url(url)) => Ok((
            StatusCode::OK,
            Json(json!({
                "url": url,
                "creditsCharged": charge.cost,
            })),
        )
            .into_response()),
        Ok(ProcessedOutput::Image {
            bytes,
            content_type,
        }) => Ok(([(CONTENT_TYPE, content_type)], bytes).into_response()),
        Err(error) => {
            tracing::error!(
                error = %error,
                operation = charge.operation.as_str(),
                "processing failed, refunding charge"
            );
            if let Err(refund_error) =
                refund_charge(state.store.as_ref(), user_id, &charge).await
            {
                tracing::error!(
                    error = %refund_error,
                    user = %user_id,
                    credits = charge.cost,
                    "failed to refund charge after processing failure"
                );
            }
            Err(ApiError::Upstream(error))
        }
    }
}

pub async fn apply_for_affiliate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    if let Some(existing) = state.store.get_affiliate_for_user(user.user_id).await? {
        return Ok((StatusCode::OK, Json(json!({ "affiliate": existing }))).into_response());
    }

    let email = user
        .email
        .clone()
        .ok_or_else(|| ApiError::BadRequest("Token is missing an email claim.".to_string()))?;

    let application = affiliate::new_application(user.user_id, &email);
    state.store.create_affiliate(application.clone()).await?;

    Ok((StatusCode::OK, Json(json!({ "affiliate": application }))).into_response())
}

pub async fn get_affiliate_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let affiliate = state
        .store
        .get_affiliate_for_user(user.user_id)
        .await?
        .ok_or(ApiError::NotFound("No affiliate account."))?;

    let summary = state.store.affiliate_summary(user.user_id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "affiliate": affiliate,
            "summary": summary,
        })),
    )
        .into_response())
}

pub async fn admin_adjust_credits(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<UserIdPath>,
    Json(request): Json<AdminCreditAdjustment>,
) -> Result<Response, ApiError> {
    if request.amount == 0 {
        return Err(ApiError::BadRequest("amount must be non-zero.".to_string()));
    }

    let outcome = state
        .store
        .apply_credits(
            path.id,
            request.amount,
            TransactionReason::AdminAdjustment,
            None,
        )
        .await
        .map_err(|error| match error {
            crate::store::StoreError::InsufficientCredits => ApiError::BadRequest(
                "Adjustment would drive the balance negative.".to_string(),
            ),
            other => ApiError::from(other),
        })?;

    Ok((
        StatusCode::OK,
        Json(json!({ "credits": outcome.balance })),
    )
        .into_response())
}

pub async fn admin_get_user(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<UserIdPath>,
) -> Result<Response, ApiError> {
    let profile = state
        .store
        .get_profile(path.id)
        .await?
        .ok_or(ApiError::NotFound("Profile not found."))?;

    let transactions = state
        .store
        .list_transactions(path.id, TRANSACTION_PAGE_SIZE)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "profile": profile,
            "transactions": transactions,
        })),
    )
        .into_response())
}

pub async fn admin_review_affiliate(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<UserIdPath>,
    Json(request): Json<AffiliateReview>,
) -> Result<Response, ApiError> {
    let status = if request.approve {
        AffiliateStatus::Approved
    } else {
        AffiliateStatus::Rejected
    };

    state.store.set_affiliate_status(path.id, status).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "status": status.as_str() })),
    )
        .into_response())
}

//! Stripe webhook handling: signature enforcement, credit grants, and
//! redelivery idempotency, exercised against the full router.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use dtf_api_server::store::{CreditStore, TransactionReason};

use common::{body_json, profile, stripe_signature, test_app, webhook_request, WEBHOOK_SECRET};

fn payment_intent_payload(intent_id: &str, user_id: Uuid, credits: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_pi_1",
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": intent_id,
                "amount": 1499,
                "metadata": {
                    "userId": user_id.to_string(),
                    "credits": credits.to_string(),
                }
            }
        }
    }))
    .unwrap()
}

fn subscription_payload(event_type: &str, user_id: Uuid, price_id: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_sub_1",
        "type": event_type,
        "data": {
            "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": status,
                "current_period_end": Utc::now().timestamp() + 30 * 24 * 60 * 60,
                "cancel_at_period_end": false,
                "items": { "data": [ { "price": { "id": price_id } } ] },
                "metadata": { "userId": user_id.to_string() }
            }
        }
    }))
    .unwrap()
}

fn renewal_invoice_payload(invoice_id: &str, customer_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_inv_1",
        "type": "invoice.payment_succeeded",
        "data": {
            "object": {
                "id": invoice_id,
                "customer": customer_id,
                "billing_reason": "subscription_cycle",
                "amount_paid": 999,
                "metadata": {}
            }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn missing_signature_is_rejected_without_state_change() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    let payload = payment_intent_payload("pi_missing_sig", user_id, 10);
    let response = app
        .router
        .oneshot(webhook_request(&payload, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 0);
    assert!(app
        .store
        .list_transactions(user_id, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    let payload = payment_intent_payload("pi_wrong_secret", user_id, 10);
    let signature = stripe_signature(&payload, "whsec_other", Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "invalid_signature");
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 0);
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    let payload = payment_intent_payload("pi_stale", user_id, 10);
    let stale = Utc::now().timestamp() - 600;
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, stale);
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tampered_payload_is_rejected() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    let payload = payment_intent_payload("pi_tampered", user_id, 10);
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let tampered = payment_intent_payload("pi_tampered", user_id, 1000);
    let response = app
        .router
        .oneshot(webhook_request(&tampered, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 0);
}

#[tokio::test]
async fn payment_intent_grants_credits_exactly_once() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 5));

    let payload = payment_intent_payload("pi_grant_1", user_id, 20);

    for _ in 0..2 {
        let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        let response = app
            .router
            .clone()
            .oneshot(webhook_request(&payload, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 25);

    let purchases: Vec<_> = app
        .store
        .list_transactions(user_id, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.reason == TransactionReason::Purchase)
        .collect();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].delta, 20);
    assert_eq!(purchases[0].payment_ref.as_deref(), Some("pi_grant_1"));
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged() {
    let app = test_app();
    let payload = serde_json::to_vec(&json!({
        "id": "evt_unknown",
        "type": "customer.tax_id.created",
        "data": { "object": {} }
    }))
    .unwrap();
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn subscription_created_updates_plan_and_status() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 2));

    let payload = subscription_payload(
        "customer.subscription.created",
        user_id,
        "price_basic",
        "active",
    );
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.subscription_plan, "basic");
    assert_eq!(stored.subscription_status, "active");
    assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_1"));
    assert!(stored.current_period_end.is_some());
}

#[tokio::test]
async fn subscription_deleted_downgrades_to_free() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    let mut seeded = profile(user_id, 2);
    seeded.subscription_plan = "starter".to_string();
    seeded.subscription_status = "active".to_string();
    seeded.stripe_subscription_id = Some("sub_1".to_string());
    seeded.current_period_end = Some(Utc::now());
    app.store.seed_profile(seeded);

    let payload = subscription_payload(
        "customer.subscription.deleted",
        user_id,
        "price_starter",
        "canceled",
    );
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.subscription_plan, "free");
    assert_eq!(stored.subscription_status, "canceled");
    // The Stripe linkage is cleared, not left stale.
    assert_eq!(stored.stripe_subscription_id, None);
    assert_eq!(stored.current_period_end, None);
}

#[tokio::test]
async fn failed_invoice_marks_the_subscription_past_due() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    let mut seeded = profile(user_id, 5);
    seeded.subscription_plan = "basic".to_string();
    seeded.subscription_status = "active".to_string();
    seeded.stripe_customer_id = Some("cus_fail".to_string());
    app.store.seed_profile(seeded);

    let payload = serde_json::to_vec(&json!({
        "id": "evt_inv_fail",
        "type": "invoice.payment_failed",
        "data": {
            "object": {
                "id": "in_fail_1",
                "customer": "cus_fail",
                "billing_reason": "subscription_cycle",
                "metadata": {}
            }
        }
    }))
    .unwrap();
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.subscription_status, "past_due");
    // No credits move on a failed payment.
    assert_eq!(stored.credits, 5);
}

#[tokio::test]
async fn payment_checkout_session_is_a_fallback_grant() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    let payload = serde_json::to_vec(&json!({
        "id": "evt_cs_1",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_fallback_1",
                "mode": "payment",
                "status": "complete",
                "customer": "cus_cs",
                "payment_intent": "pi_cs_1",
                "amount_total": 799,
                "metadata": {
                    "userId": user_id.to_string(),
                    "credits": "10"
                }
            }
        }
    }))
    .unwrap();

    for _ in 0..2 {
        let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        let response = app
            .router
            .clone()
            .oneshot(webhook_request(&payload, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 10);
    assert_eq!(stored.stripe_customer_id.as_deref(), Some("cus_cs"));
}

#[tokio::test]
async fn checkout_session_defers_to_a_recorded_intent_grant() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    // The payment_intent event already granted these credits.
    let intent_payload = payment_intent_payload("pi_cs_seen", user_id, 10);
    let signature = stripe_signature(&intent_payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .clone()
        .oneshot(webhook_request(&intent_payload, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let payload = serde_json::to_vec(&json!({
        "id": "evt_cs_2",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_seen_1",
                "mode": "payment",
                "status": "complete",
                "payment_intent": "pi_cs_seen",
                "metadata": {
                    "userId": user_id.to_string(),
                    "credits": "10"
                }
            }
        }
    }))
    .unwrap();
    let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 10);
}

#[tokio::test]
async fn checkout_arriving_before_the_intent_grants_once() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 0));

    // Stripe does not order events; the session can land first.
    let session_payload = serde_json::to_vec(&json!({
        "id": "evt_cs_3",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_order_1",
                "mode": "payment",
                "status": "complete",
                "payment_intent": "pi_order_1",
                "metadata": {
                    "userId": user_id.to_string(),
                    "credits": "10"
                }
            }
        }
    }))
    .unwrap();
    let signature = stripe_signature(&session_payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .clone()
        .oneshot(webhook_request(&session_payload, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let intent_payload = payment_intent_payload("pi_order_1", user_id, 10);
    let signature = stripe_signature(&intent_payload, WEBHOOK_SECRET, Utc::now().timestamp());
    let response = app
        .router
        .oneshot(webhook_request(&intent_payload, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 10);

    let purchases: Vec<_> = app
        .store
        .list_transactions(user_id, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.reason == TransactionReason::Purchase)
        .collect();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].payment_ref.as_deref(), Some("pi_order_1"));
}

#[tokio::test]
async fn renewal_invoice_grants_monthly_credits_once() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    let mut seeded = profile(user_id, 1);
    seeded.subscription_plan = "basic".to_string();
    seeded.subscription_status = "active".to_string();
    seeded.stripe_customer_id = Some("cus_renew".to_string());
    app.store.seed_profile(seeded);

    let payload = renewal_invoice_payload("in_renew_1", "cus_renew");

    for _ in 0..2 {
        let signature = stripe_signature(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        let response = app
            .router
            .clone()
            .oneshot(webhook_request(&payload, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Basic grants 20 per cycle; the redelivered invoice must not grant again.
    let stored = app.store.get_profile(user_id).await.unwrap().unwrap();
    assert_eq!(stored.credits, 21);

    let renewals: Vec<_> = app
        .store
        .list_transactions(user_id, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.reason == TransactionReason::SubscriptionRenewal)
        .collect();
    assert_eq!(renewals.len(), 1);
    assert_eq!(renewals[0].payment_ref.as_deref(), Some("in_renew_1"));
}

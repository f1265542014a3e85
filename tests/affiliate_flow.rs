//! Affiliate program: applications, referral linking at signup, commission
//! recording, and the admin review route.

mod common;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use dtf_api_server::{
    affiliate::{self, DEFAULT_RATE_ONETIME},
    store::{Affiliate, AffiliateStatus, CreditStore, ReferralStatus},
};

use common::{bearer_token, body_json, profile, test_app};

fn approved_affiliate(user_id: Uuid, code: &str) -> Affiliate {
    Affiliate {
        user_id,
        status: AffiliateStatus::Approved,
        referral_code: code.to_string(),
        commission_rate_onetime: DEFAULT_RATE_ONETIME,
        commission_rate_recurring: DEFAULT_RATE_ONETIME,
    }
}

#[tokio::test]
async fn applying_creates_a_pending_affiliate() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 2));

    let request = Request::builder()
        .method("POST")
        .uri("/api/affiliate/apply")
        .header("content-type", "application/json")
        .header(AUTHORIZATION, bearer_token(user_id))
        .body(Body::empty())
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["affiliate"]["status"], "pending");

    let stored = app
        .store
        .get_affiliate_for_user(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AffiliateStatus::Pending);
    assert!(!stored.referral_code.is_empty());
}

#[tokio::test]
async fn signup_with_referral_code_links_the_new_user() {
    let app = test_app();
    let affiliate_id = Uuid::new_v4();
    app.store.seed_profile(profile(affiliate_id, 0));
    app.store
        .create_affiliate(approved_affiliate(affiliate_id, "LAURIE1234"))
        .await
        .unwrap();

    let new_user = Uuid::new_v4();
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/signup-complete")
        .header("content-type", "application/json")
        .header(AUTHORIZATION, bearer_token(new_user))
        .body(Body::from(
            serde_json::to_vec(&json!({ "referralCode": "LAURIE1234" })).unwrap(),
        ))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Signup grant lands with the profile.
    let created = app.store.get_profile(new_user).await.unwrap().unwrap();
    assert_eq!(created.credits, 2);

    let referral = app
        .store
        .referral_for_user(new_user)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(referral.affiliate_user_id, affiliate_id);
    assert_eq!(referral.status, ReferralStatus::SignedUp);
}

#[tokio::test]
async fn unknown_referral_code_is_ignored() {
    let app = test_app();
    let new_user = Uuid::new_v4();

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/signup-complete")
        .header("content-type", "application/json")
        .header(AUTHORIZATION, bearer_token(new_user))
        .body(Body::from(
            serde_json::to_vec(&json!({ "referralCode": "NOSUCH0000" })).unwrap(),
        ))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app
        .store
        .referral_for_user(new_user)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn conversion_records_commission_and_flips_referral() {
    let app = test_app();
    let affiliate_id = Uuid::new_v4();
    let referred = Uuid::new_v4();
    app.store.seed_profile(profile(affiliate_id, 0));
    app.store.seed_profile(profile(referred, 2));
    app.store
        .create_affiliate(approved_affiliate(affiliate_id, "CONV0001"))
        .await
        .unwrap();
    app.store
        .record_referral(dtf_api_server::store::Referral {
            affiliate_user_id: affiliate_id,
            referred_user_id: referred,
            status: ReferralStatus::SignedUp,
        })
        .await
        .unwrap();

    // Delivered twice, recorded once.
    for _ in 0..2 {
        affiliate::record_conversion(app.store.as_ref(), referred, 999, false, Some("pi_conv"))
            .await
            .unwrap();
    }

    let referral = app
        .store
        .referral_for_user(referred)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(referral.status, ReferralStatus::Converted);

    // 20% of 999 cents, rounded.
    let summary = app.store.affiliate_summary(affiliate_id).await.unwrap();
    assert_eq!(summary.referral_count, 1);
    assert_eq!(summary.converted_count, 1);
    assert_eq!(summary.total_commission_cents, 200);
}

#[tokio::test]
async fn unapproved_affiliate_earns_nothing() {
    let app = test_app();
    let affiliate_id = Uuid::new_v4();
    let referred = Uuid::new_v4();
    app.store.seed_profile(profile(affiliate_id, 0));
    app.store.seed_profile(profile(referred, 2));

    let mut pending = approved_affiliate(affiliate_id, "PEND0001");
    pending.status = AffiliateStatus::Pending;
    app.store.create_affiliate(pending).await.unwrap();
    app.store
        .record_referral(dtf_api_server::store::Referral {
            affiliate_user_id: affiliate_id,
            referred_user_id: referred,
            status: ReferralStatus::SignedUp,
        })
        .await
        .unwrap();

    affiliate::record_conversion(app.store.as_ref(), referred, 2499, false, Some("pi_pend"))
        .await
        .unwrap();

    let summary = app.store.affiliate_summary(affiliate_id).await.unwrap();
    assert_eq!(summary.total_commission_cents, 0);
    let referral = app
        .store
        .referral_for_user(referred)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(referral.status, ReferralStatus::SignedUp);
}

#[tokio::test]
async fn unreferred_payer_produces_no_commission() {
    let app = test_app();
    let payer = Uuid::new_v4();
    app.store.seed_profile(profile(payer, 2));

    affiliate::record_conversion(app.store.as_ref(), payer, 999, true, Some("in_none"))
        .await
        .unwrap();
}

#[tokio::test]
async fn admin_can_review_an_application() {
    let app = test_app();
    let admin_id = Uuid::new_v4();
    let mut admin = profile(admin_id, 0);
    admin.is_admin = true;
    app.store.seed_profile(admin);

    let applicant = Uuid::new_v4();
    app.store.seed_profile(profile(applicant, 2));
    let mut application = approved_affiliate(applicant, "APPL0001");
    application.status = AffiliateStatus::Pending;
    app.store.create_affiliate(application).await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/admin/affiliates/{}/review", applicant))
        .header("content-type", "application/json")
        .header(AUTHORIZATION, bearer_token(admin_id))
        .body(Body::from(
            serde_json::to_vec(&json!({ "approve": true })).unwrap(),
        ))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app
        .store
        .get_affiliate_for_user(applicant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AffiliateStatus::Approved);
}

#[tokio::test]
async fn non_admin_cannot_review() {
    let app = test_app();
    let user_id = Uuid::new_v4();
    app.store.seed_profile(profile(user_id, 2));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/admin/affiliates/{}/review", Uuid::new_v4()))
        .header("content-type", "application/json")
        .header(AUTHORIZATION, bearer_token(user_id))
        .body(Body::from(
            serde_json::to_vec(&json!({ "approve": true })).unwrap(),
        ))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

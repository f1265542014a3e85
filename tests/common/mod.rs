#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use dtf_api_server::{
    auth::AuthService,
    build_router,
    config::Config,
    processing::ProcessingClient,
    state::AppState,
    store::{MemoryStore, Profile},
    stripe_api::StripeApi,
};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn test_config() -> Config {
    Config {
        port: 0,
        trust_proxy: false,
        tls_key_path: None,
        tls_cert_path: None,
        supabase_url: None,
        supabase_service_role_key: None,
        supabase_jwt_secret: Some(JWT_SECRET.to_string()),
        stripe_secret_key: None,
        stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        app_url: Some("http://localhost:3000".to_string()),
        processing_concurrency: 2,
        log_processing_timings: false,
        stripe_price_id_basic: Some("price_basic".to_string()),
        stripe_price_id_starter: Some("price_starter".to_string()),
        stripe_price_id_credits_10: Some("price_c10".to_string()),
        stripe_price_id_credits_20: Some("price_c20".to_string()),
        stripe_price_id_credits_50: Some("price_c50".to_string()),
        deep_image_api_key: None,
        clippingmagic_api_id: None,
        clippingmagic_api_secret: None,
        vectorizer_api_id: None,
        vectorizer_api_secret: None,
        openai_api_key: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
}

pub fn test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let auth = AuthService::new(Some(JWT_SECRET));
    let stripe = StripeApi::new(None, Some(WEBHOOK_SECRET.to_string())).unwrap();
    let processing = ProcessingClient::from_config(&config).unwrap();

    let state = AppState::new(config, store.clone(), auth, stripe, processing);
    TestApp {
        router: build_router(state),
        store,
    }
}

pub fn profile(user_id: Uuid, credits: i64) -> Profile {
    Profile {
        id: user_id,
        email: format!("user-{}@example.com", user_id.simple()),
        credits,
        subscription_plan: "free".to_string(),
        subscription_status: "inactive".to_string(),
        stripe_customer_id: None,
        stripe_subscription_id: None,
        current_period_end: None,
        is_admin: false,
    }
}

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    email: String,
    aud: String,
    exp: usize,
}

pub fn bearer_token(user_id: Uuid) -> String {
    let claims = TestClaims {
        sub: user_id.to_string(),
        email: format!("user-{}@example.com", user_id.simple()),
        aud: "authenticated".to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

pub fn stripe_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, std::str::from_utf8(payload).unwrap());
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signed_payload.as_bytes());
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

pub fn webhook_request(payload: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/stripe/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_vec())).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

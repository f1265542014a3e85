use std::{env, path::PathBuf};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub trust_proxy: bool,
    pub tls_key_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub supabase_jwt_secret: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub app_url: Option<String>,
    pub processing_concurrency: usize,
    pub log_processing_timings: bool,
    pub stripe_price_id_basic: Option<String>,
    pub stripe_price_id_starter: Option<String>,
    pub stripe_price_id_credits_10: Option<String>,
    pub stripe_price_id_credits_20: Option<String>,
    pub stripe_price_id_credits_50: Option<String>,
    pub deep_image_api_key: Option<String>,
    pub clippingmagic_api_id: Option<String>,
    pub clippingmagic_api_secret: Option<String>,
    pub vectorizer_api_id: Option<String>,
    pub vectorizer_api_secret: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parse_u16(env::var("PORT").ok(), 3001);

        let trust_proxy = match env::var("TRUST_PROXY") {
            Ok(value) => {
                let normalized = value.trim().to_lowercase();
                !matches!(normalized.as_str(), "false" | "0" | "off" | "no")
            }
            Err(_) => true,
        };

        let processing_concurrency = parse_usize(env::var("PROCESSING_CONCURRENCY").ok(), 3);

        Ok(Self {
            port,
            trust_proxy,
            tls_key_path: env::var("TLS_KEY_PATH").ok().map(PathBuf::from),
            tls_cert_path: env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            supabase_url: env::var("SUPABASE_URL")
                .ok()
                .map(|value| normalize_base_url(&value)),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET").ok(),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            app_url: env::var("APP_URL").ok(),
            processing_concurrency,
            log_processing_timings: env::var("LOG_PROCESSING_TIMINGS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            stripe_price_id_basic: env::var("STRIPE_PRICE_ID_BASIC").ok(),
            stripe_price_id_starter: env::var("STRIPE_PRICE_ID_STARTER").ok(),
            stripe_price_id_credits_10: env::var("STRIPE_PRICE_ID_CREDITS_10").ok(),
            stripe_price_id_credits_20: env::var("STRIPE_PRICE_ID_CREDITS_20").ok(),
            stripe_price_id_credits_50: env::var("STRIPE_PRICE_ID_CREDITS_50").ok(),
            deep_image_api_key: env::var("DEEP_IMAGE_API_KEY").ok(),
            clippingmagic_api_id: env::var("CLIPPINGMAGIC_API_ID").ok(),
            clippingmagic_api_secret: env::var("CLIPPINGMAGIC_API_SECRET").ok(),
            vectorizer_api_id: env::var("VECTORIZER_API_ID").ok(),
            vectorizer_api_secret: env::var("VECTORIZER_API_SECRET").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
        })
    }
}

fn parse_u16(value: Option<String>, fallback: u16) -> u16 {
    value
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

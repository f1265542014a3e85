use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Credits granted to every new profile at signup.
pub const SIGNUP_CREDITS: i64 = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Free,
    Basic,
    Starter,
}

impl PlanId {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Basic => "basic",
            PlanId::Starter => "starter",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PlanDefinition {
    pub monthly_credits: i64,
    pub price_cents: i64,
}

pub fn plan_definition(plan_id: PlanId) -> PlanDefinition {
    match plan_id {
        PlanId::Free => PlanDefinition {
            monthly_credits: 0,
            price_cents: 0,
        },
        PlanId::Basic => PlanDefinition {
            monthly_credits: 20,
            price_cents: 999,
        },
        PlanId::Starter => PlanDefinition {
            monthly_credits: 60,
            price_cents: 2_499,
        },
    }
}

pub fn resolve_plan_id(plan: Option<&str>) -> PlanId {
    match plan
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "basic" => PlanId::Basic,
        "starter" => PlanId::Starter,
        _ => PlanId::Free,
    }
}

pub fn is_subscription_active(status: Option<&str>) -> bool {
    matches!(
        status
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "active" | "trialing"
    )
}

/// What a Stripe price id buys: a recurring plan or a one-time credit package.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PriceTarget {
    Plan(PlanId),
    CreditPackage { credits: i64 },
}

#[derive(Clone, Debug)]
pub struct PriceMap {
    by_price_id: HashMap<String, PriceTarget>,
}

impl PriceMap {
    pub fn from_config(config: &Config) -> Self {
        let mut by_price_id = HashMap::new();
        insert_price(
            &mut by_price_id,
            config.stripe_price_id_basic.clone(),
            PriceTarget::Plan(PlanId::Basic),
        );
        insert_price(
            &mut by_price_id,
            config.stripe_price_id_starter.clone(),
            PriceTarget::Plan(PlanId::Starter),
        );
        insert_price(
            &mut by_price_id,
            config.stripe_price_id_credits_10.clone(),
            PriceTarget::CreditPackage { credits: 10 },
        );
        insert_price(
            &mut by_price_id,
            config.stripe_price_id_credits_20.clone(),
            PriceTarget::CreditPackage { credits: 20 },
        );
        insert_price(
            &mut by_price_id,
            config.stripe_price_id_credits_50.clone(),
            PriceTarget::CreditPackage { credits: 50 },
        );
        Self { by_price_id }
    }

    pub fn target_for_price_id(&self, price_id: Option<&str>) -> Option<PriceTarget> {
        let price_id = price_id?.trim();
        if price_id.is_empty() {
            return None;
        }
        self.by_price_id.get(price_id).copied()
    }

    pub fn plan_for_price_id(&self, price_id: Option<&str>) -> Option<PlanId> {
        match self.target_for_price_id(price_id) {
            Some(PriceTarget::Plan(plan_id)) => Some(plan_id),
            _ => None,
        }
    }
}

fn insert_price(
    map: &mut HashMap<String, PriceTarget>,
    price_id: Option<String>,
    target: PriceTarget,
) {
    if let Some(price_id) = price_id.map(|v| v.trim().to_string()) {
        if !price_id.is_empty() {
            map.insert(price_id, target);
        }
    }
}

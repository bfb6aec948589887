#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitebank::{
    config::Settings,
    database,
    domain::{
        Clock, CreateDonationRequest, CreateTimeSlotRequest, Donation, DonationCompletion, Moment,
        TimeSlot,
    },
    error::{AppError, Result},
    payments::{CheckoutProvider, CheckoutRequest, CheckoutSession, ProviderPaymentStatus, SessionData},
    service::ServiceContext,
};
use chrono::{NaiveTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

/// Single-connection in-memory database with migrations applied. The one
/// connection must never be recycled or the database disappears with it.
pub async fn memory_pool() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    database::migrate(&pool).await?;
    Ok(pool)
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.payments.enabled = true;
    settings.payments.secret_key = Some("sk_test_123".to_string());
    settings.server.base_url = "http://bitebank.test".to_string();
    settings
}

pub async fn context(provider: Option<Arc<FakeProvider>>) -> anyhow::Result<ServiceContext> {
    context_with(test_settings(), provider).await
}

pub async fn context_with(
    settings: Settings,
    provider: Option<Arc<FakeProvider>>,
) -> anyhow::Result<ServiceContext> {
    let pool = memory_pool().await?;
    let provider = provider.map(|p| p as Arc<dyn CheckoutProvider>);
    Ok(ServiceContext::new(pool, &settings, provider).await)
}

/// Manila wall-clock time on 2025-03-`day`.
pub fn manila(day: u32, hour: u32, minute: u32) -> Moment {
    let local = chrono::FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 3, day, hour, minute, 0)
        .unwrap();
    Clock::new(480).at(local.with_timezone(&Utc))
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub async fn lunch_slot(ctx: &ServiceContext) -> anyhow::Result<TimeSlot> {
    Ok(ctx
        .time_slots
        .create(
            CreateTimeSlotRequest {
                display_name: "Lunch".to_string(),
                start_time: time(11, 0),
                end_time: time(13, 0),
                is_active: true,
            },
            &manila(10, 8, 0),
        )
        .await?)
}

pub fn donation_request(amount_centavos: i64) -> CreateDonationRequest {
    CreateDonationRequest {
        donor_id: Uuid::new_v4(),
        amount_centavos,
        meal_count: None,
        payment_method: "gcash".to_string(),
    }
}

/// A donation completed straight through the ledger, with its units minted.
pub async fn funded_donation(ctx: &ServiceContext, meals: i32) -> anyhow::Result<Donation> {
    let at = manila(10, 8, 0);
    let request = CreateDonationRequest {
        meal_count: Some(meals),
        ..donation_request(6500 * i64::from(meals))
    };
    let donation = ctx.ledger.create_pending_donation(&request, meals, &at).await?;
    let completion = DonationCompletion {
        checkout_session_id: format!("cs_{}", donation.id.simple()),
        payment_intent_id: None,
        provider_metadata: None,
    };
    let outcome = ctx.ledger.mark_completed(&donation, &completion, &at).await?;
    Ok(outcome.donation().clone())
}

pub fn paid_session(id: &str, amount_total: i64) -> SessionData {
    SessionData {
        id: id.to_string(),
        payment_status: ProviderPaymentStatus::Paid,
        amount_total,
        payment_intent: Some(format!("pi_{}", id)),
        extra: Map::new(),
    }
}

pub fn webhook_payload(event_type: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": event_type,
        "data": { "object": object }
    }))
    .unwrap()
}

/// In-memory stand-in for the payment provider.
#[derive(Default)]
pub struct FakeProvider {
    pub created: Mutex<Vec<CheckoutRequest>>,
    pub sessions: Mutex<HashMap<String, SessionData>>,
    pub fail_create: AtomicBool,
    pub fail_retrieve: AtomicBool,
    pub retrievals: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// What `retrieve_checkout_session` will report for `id`.
    pub fn report(&self, session: SessionData) {
        self.sessions.lock().unwrap().insert(session.id.clone(), session);
    }
}

#[async_trait]
impl CheckoutProvider for FakeProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::External("Payment provider timed out".to_string()));
        }

        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let id = format!("cs_test_{}", created.len());

        Ok(CheckoutSession {
            id: id.clone(),
            checkout_url: Some(format!("https://checkout.test/{}", id)),
            status: Some("active".to_string()),
            raw: json!({ "id": id, "status": "active" }),
        })
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<Option<SessionData>> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        if self.fail_retrieve.load(Ordering::SeqCst) {
            return Err(AppError::External("Payment provider unavailable".to_string()));
        }
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }
}

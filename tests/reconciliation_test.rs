mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bitebank::{
    domain::{metric::*, CreateDonationRequest, Donation, MealUnitStatus, PaymentStatus},
    error::{AppError, Result},
    events::EventBus,
    payments::{
        webhook::{compute_signature, CHECKOUT_SESSION_COMPLETED, CHECKOUT_SESSION_EXPIRED},
        CancelOutcome, CheckoutProvider, PaymentReconciler, ProviderPaymentStatus,
        ReconcileOutcome, WebhookOutcome,
    },
    repository::{
        CompletionRecord, DonationRepository, DonationTotals, SqliteDonationRepository,
        SqliteMealUnitRepository,
    },
    service::{donation_ledger::DonationLedger, inventory_service::InventoryService},
};
use chrono::{DateTime, Utc};
use common::*;
use serde_json::json;
use uuid::Uuid;

/// SQLite-backed donations whose completing write always breaks.
struct BrokenCompletion {
    inner: SqliteDonationRepository,
    error: fn(String) -> AppError,
}

#[async_trait]
impl DonationRepository for BrokenCompletion {
    async fn create(&self, donation: Donation) -> Result<Donation> {
        self.inner.create(donation).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Donation>> {
        self.inner.find_by_session_id(session_id).await
    }

    async fn list_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>> {
        self.inner.list_by_donor(donor_id).await
    }

    async fn attach_checkout_session(
        &self,
        id: Uuid,
        session_id: &str,
        metadata: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Donation> {
        self.inner
            .attach_checkout_session(id, session_id, metadata, now)
            .await
    }

    async fn complete(
        &self,
        _completed: &Donation,
        _unit_expires_at: Option<DateTime<Utc>>,
    ) -> Result<CompletionRecord> {
        Err((self.error)("disk I/O error".to_string()))
    }

    async fn fail(&self, failed: &Donation) -> Result<bool> {
        self.inner.fail(failed).await
    }

    async fn completed_totals(&self) -> Result<DonationTotals> {
        self.inner.completed_totals().await
    }
}

async fn reconciler_with_broken_completion(
    error: fn(String) -> AppError,
) -> anyhow::Result<(PaymentReconciler, Arc<DonationLedger>, Arc<InventoryService>)> {
    let pool = memory_pool().await?;
    let settings = test_settings();
    let event_bus = Arc::new(EventBus::new());

    let inventory = Arc::new(InventoryService::new(
        Arc::new(SqliteMealUnitRepository::new(pool.clone())),
        event_bus.clone(),
        None,
    ));
    let repo = Arc::new(BrokenCompletion {
        inner: SqliteDonationRepository::new(pool),
        error,
    });
    let ledger = Arc::new(DonationLedger::new(repo, inventory.clone(), event_bus));
    let provider: Arc<dyn CheckoutProvider> = FakeProvider::new();
    let reconciler = PaymentReconciler::new(
        ledger.clone(),
        Some(provider),
        settings.payments.clone(),
        &settings.server.base_url,
    );

    Ok((reconciler, ledger, inventory))
}

#[tokio::test]
async fn test_donation_of_195_pesos_becomes_three_meals() -> anyhow::Result<()> {
    let provider = FakeProvider::new();
    let ctx = context(Some(provider.clone())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(19500), Some("donor@example.com".to_string()), &at)
        .await?;
    assert_eq!(donation.meal_count, 3);
    assert_eq!(donation.payment_status, PaymentStatus::Pending);
    assert_eq!(donation.checkout_session_id.as_deref(), Some(session.id.as_str()));

    {
        let created = provider.created.lock().unwrap();
        assert_eq!(created[0].amount_centavos, 19500);
        assert_eq!(
            created[0].success_url,
            format!("http://bitebank.test/donations/{}/success", donation.id)
        );
        assert_eq!(created[0].expires_at, at.utc + chrono::Duration::hours(1));
    }

    let payload = webhook_payload(
        CHECKOUT_SESSION_COMPLETED,
        json!({
            "id": session.id,
            "payment_status": "paid",
            "amount_total": 19500,
            "payment_intent": "pi_1"
        }),
    );
    let outcome = ctx.reconciler.process_webhook(&payload, None, &at).await?;
    assert!(matches!(outcome, WebhookOutcome::Handled(ReconcileOutcome::Completed(_))));

    let donation = ctx.ledger.get(donation.id).await?;
    assert_eq!(donation.payment_status, PaymentStatus::Completed);
    assert_eq!(donation.payment_intent_id.as_deref(), Some("pi_1"));
    assert!(donation.completed_at.is_some());

    let units = ctx.inventory.list_for_donation(donation.id).await?;
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|u| u.status == MealUnitStatus::Available));

    assert_eq!(ctx.metrics.get(TOTAL_MEALS_AVAILABLE).await?, 3);
    assert_eq!(ctx.metrics.get(TOTAL_DONATIONS_RECEIVED).await?, 19500);
    assert_eq!(ctx.metrics.get(TOTAL_DONORS).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_completion_creates_units_once() -> anyhow::Result<()> {
    let provider = FakeProvider::new();
    let ctx = context(Some(provider.clone())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(19500), None, &at)
        .await?;

    // Webhook and browser callback racing with identical session data
    let first = ctx
        .reconciler
        .process_payment_completion(&donation, Some(paid_session(&session.id, 19500)), &at)
        .await?;
    let second = ctx
        .reconciler
        .process_payment_completion(&donation, Some(paid_session(&session.id, 19500)), &at)
        .await?;

    assert!(matches!(first, ReconcileOutcome::Completed(_)));
    assert!(matches!(second, ReconcileOutcome::AlreadyCompleted(_)));
    assert!(second.is_success());

    assert_eq!(ctx.inventory.list_for_donation(donation.id).await?.len(), 3);
    assert_eq!(ctx.metrics.get(TOTAL_MEALS_AVAILABLE).await?, 3);
    assert_eq!(ctx.metrics.get(TOTAL_DONATIONS_RECEIVED).await?, 19500);

    // A later call with the fresh record short-circuits on the status guard
    let fresh = ctx.ledger.get(donation.id).await?;
    let third = ctx.reconciler.process_payment_completion(&fresh, None, &at).await?;
    assert!(matches!(third, ReconcileOutcome::AlreadyCompleted(_)));
    assert_eq!(provider.retrievals.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_amount_mismatch_never_completes() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(19500), None, &at)
        .await?;

    let err = ctx
        .reconciler
        .process_payment_completion(&donation, Some(paid_session(&session.id, 6500)), &at)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IntegrityMismatch(_)));

    let donation = ctx.ledger.get(donation.id).await?;
    assert_eq!(donation.payment_status, PaymentStatus::Pending);
    assert!(ctx.inventory.list_for_donation(donation.id).await?.is_empty());
    assert_eq!(ctx.metrics.get(TOTAL_MEALS_AVAILABLE).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_session_id_mismatch_is_rejected() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let (donation, _) = ctx
        .reconciler
        .start_donation(&donation_request(13000), None, &at)
        .await?;

    let err = ctx
        .reconciler
        .process_payment_completion(&donation, Some(paid_session("cs_someone_else", 13000)), &at)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IntegrityMismatch(_)));
    assert!(ctx.ledger.get(donation.id).await?.is_pending());

    Ok(())
}

#[tokio::test]
async fn test_cancel_after_completion_is_ignored() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;
    ctx.reconciler
        .process_payment_completion(&donation, Some(paid_session(&session.id, 6500)), &at)
        .await?;

    let outcome = ctx.reconciler.mark_payment_cancelled(donation.id, &at).await?;
    match outcome {
        CancelOutcome::Ignored { donation, warning } => {
            assert_eq!(donation.payment_status, PaymentStatus::Completed);
            assert!(warning.contains("already completed"), "{}", warning);
        }
        CancelOutcome::Cancelled(_) => panic!("completed donation was cancelled"),
    }

    let donation = ctx.ledger.get(donation.id).await?;
    assert_eq!(donation.payment_status, PaymentStatus::Completed);
    assert_eq!(donation.checkout_session_id.as_deref(), Some(session.id.as_str()));

    Ok(())
}

#[tokio::test]
async fn test_cancelled_donation_is_never_resurrected() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;

    let outcome = ctx.reconciler.mark_payment_cancelled(donation.id, &at).await?;
    let CancelOutcome::Cancelled(cancelled) = outcome else {
        panic!("pending donation should cancel");
    };
    assert_eq!(cancelled.payment_status, PaymentStatus::Failed);
    assert!(ctx.ledger.get(donation.id).await?.checkout_session_id.is_none());

    // A late "paid" report for the old session changes nothing
    let failed = ctx.ledger.get(donation.id).await?;
    let outcome = ctx
        .reconciler
        .process_payment_completion(&failed, Some(paid_session(&session.id, 6500)), &at)
        .await?;
    assert!(matches!(outcome, ReconcileOutcome::Refused { .. }));

    let payload = webhook_payload(
        CHECKOUT_SESSION_COMPLETED,
        json!({ "id": session.id, "payment_status": "paid", "amount_total": 6500 }),
    );
    let outcome = ctx.reconciler.process_webhook(&payload, None, &at).await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    assert_eq!(ctx.ledger.get(donation.id).await?.payment_status, PaymentStatus::Failed);
    assert!(ctx.inventory.list_for_donation(donation.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_provider_statuses_fail_or_leave_pending() -> anyhow::Result<()> {
    let provider = FakeProvider::new();
    let ctx = context(Some(provider.clone())).await?;
    let at = manila(10, 9, 0);

    let (processing, processing_session) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;
    let mut session = paid_session(&processing_session.id, 6500);
    session.payment_status = ProviderPaymentStatus::parse("processing");
    provider.report(session);

    let outcome = ctx.reconciler.confirm_from_callback(processing.id, &at).await?;
    assert!(matches!(outcome, ReconcileOutcome::Unresolved { .. }));
    assert!(ctx.ledger.get(processing.id).await?.is_pending());
    assert_eq!(provider.retrievals.load(Ordering::SeqCst), 1);

    let (unpaid, unpaid_session) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;
    let mut session = paid_session(&unpaid_session.id, 6500);
    session.payment_status = ProviderPaymentStatus::Unpaid;
    provider.report(session);

    let outcome = ctx.reconciler.confirm_from_callback(unpaid.id, &at).await?;
    assert!(matches!(outcome, ReconcileOutcome::Failed(_)));
    assert_eq!(ctx.ledger.get(unpaid.id).await?.payment_status, PaymentStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn test_missing_session_data_refuses_without_mutation() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let (donation, _) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;

    // The fake provider knows nothing about the session
    let outcome = ctx.reconciler.confirm_from_callback(donation.id, &at).await?;
    assert!(matches!(outcome, ReconcileOutcome::Refused { .. }));
    assert!(ctx.ledger.get(donation.id).await?.is_pending());

    Ok(())
}

#[tokio::test]
async fn test_expired_session_webhook_fails_donation() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;

    let payload = webhook_payload(CHECKOUT_SESSION_EXPIRED, json!({ "id": session.id }));
    let outcome = ctx.reconciler.process_webhook(&payload, None, &at).await?;
    assert!(matches!(outcome, WebhookOutcome::Handled(ReconcileOutcome::Failed(_))));
    assert_eq!(ctx.ledger.get(donation.id).await?.payment_status, PaymentStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn test_malformed_and_unknown_webhooks() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let no_id = webhook_payload(CHECKOUT_SESSION_COMPLETED, json!({ "payment_status": "paid" }));
    let err = ctx.reconciler.process_webhook(&no_id, None, &at).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let no_object = br#"{"type":"checkout.session.completed","data":{}}"#;
    let err = ctx.reconciler.process_webhook(no_object, None, &at).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let unknown = webhook_payload("payment.refunded", json!({ "id": "pay_1" }));
    let outcome = ctx.reconciler.process_webhook(&unknown, None, &at).await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    Ok(())
}

#[tokio::test]
async fn test_webhook_signature_enforced_when_secret_configured() -> anyhow::Result<()> {
    let mut settings = test_settings();
    settings.payments.webhook_secret = Some("whsk_test".to_string());
    let ctx = context_with(settings, Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let payload = webhook_payload("payment.refunded", json!({ "id": "pay_1" }));

    let err = ctx.reconciler.process_webhook(&payload, None, &at).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let bad = format!("t={},li=deadbeef", at.utc.timestamp());
    let err = ctx
        .reconciler
        .process_webhook(&payload, Some(&bad), &at)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let signature = compute_signature("whsk_test", at.utc.timestamp(), &payload)?;
    let header = format!("t={},te=,li={}", at.utc.timestamp(), signature);
    let outcome = ctx.reconciler.process_webhook(&payload, Some(&header), &at).await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    Ok(())
}

#[tokio::test]
async fn test_provider_outage_leaves_donation_pending() -> anyhow::Result<()> {
    let provider = FakeProvider::new();
    provider.fail_create.store(true, Ordering::SeqCst);
    let ctx = context(Some(provider.clone())).await?;
    let at = manila(10, 9, 0);

    let request = donation_request(6500);
    let err = ctx
        .reconciler
        .start_donation(&request, None, &at)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::External(_)));

    let donations = ctx.ledger.list_by_donor(request.donor_id).await?;
    assert_eq!(donations.len(), 1);
    assert!(donations[0].is_pending());
    assert!(donations[0].checkout_session_id.is_none());

    // Retrying checkout for the same donation works once the provider is back
    provider.fail_create.store(false, Ordering::SeqCst);
    let session = ctx
        .reconciler
        .create_checkout_session(&donations[0], None, &at)
        .await?;
    let donation = ctx.ledger.get(donations[0].id).await?;
    assert_eq!(donation.checkout_session_id, Some(session.id));

    Ok(())
}

#[tokio::test]
async fn test_donation_below_one_meal_is_rejected() -> anyhow::Result<()> {
    let ctx = context(Some(FakeProvider::new())).await?;
    let at = manila(10, 9, 0);

    let err = ctx
        .reconciler
        .start_donation(&donation_request(5000), None, &at)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let zero = CreateDonationRequest {
        amount_centavos: 0,
        meal_count: Some(1),
        ..donation_request(0)
    };
    let err = ctx.reconciler.start_donation(&zero, None, &at).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_succeeded_status_is_not_a_payment() -> anyhow::Result<()> {
    let provider = FakeProvider::new();
    let ctx = context(Some(provider.clone())).await?;
    let at = manila(10, 9, 0);

    let (donation, session) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;
    let mut succeeded = paid_session(&session.id, 6500);
    succeeded.payment_status = ProviderPaymentStatus::parse("succeeded");

    let outcome = ctx
        .reconciler
        .process_payment_completion(&donation, Some(succeeded), &at)
        .await?;
    match outcome {
        ReconcileOutcome::Unresolved { provider_status, .. } => {
            assert_eq!(provider_status, "succeeded");
        }
        other => panic!("expected unresolved, got {}", other.label()),
    }

    assert!(ctx.ledger.get(donation.id).await?.is_pending());
    assert!(ctx.inventory.list_for_donation(donation.id).await?.is_empty());
    assert_eq!(ctx.metrics.get(TOTAL_MEALS_AVAILABLE).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_unexpected_storage_error_marks_donation_failed() -> anyhow::Result<()> {
    let at = manila(10, 9, 0);

    for error in [AppError::Database as fn(String) -> AppError, AppError::Internal] {
        let (reconciler, ledger, inventory) = reconciler_with_broken_completion(error).await?;

        let (donation, session) = reconciler
            .start_donation(&donation_request(13000), None, &at)
            .await?;

        let err = reconciler
            .process_payment_completion(&donation, Some(paid_session(&session.id, 13000)), &at)
            .await
            .unwrap_err();
        assert!(err.is_unexpected(), "{:?}", err);

        let stored = ledger.get(donation.id).await?;
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert!(inventory.list_for_donation(donation.id).await?.is_empty());
    }

    Ok(())
}

#[tokio::test]
async fn test_provider_error_during_reconciliation_leaves_pending() -> anyhow::Result<()> {
    let provider = FakeProvider::new();
    let ctx = context(Some(provider.clone())).await?;
    let at = manila(10, 9, 0);

    let (donation, _) = ctx
        .reconciler
        .start_donation(&donation_request(6500), None, &at)
        .await?;
    provider.fail_retrieve.store(true, Ordering::SeqCst);

    let err = ctx
        .reconciler
        .confirm_from_callback(donation.id, &at)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::External(_)));
    assert!(!err.is_unexpected());
    assert!(ctx.ledger.get(donation.id).await?.is_pending());

    // Once the provider answers again the same donation completes normally
    provider.fail_retrieve.store(false, Ordering::SeqCst);
    let session_id = ctx.ledger.get(donation.id).await?.checkout_session_id.unwrap();
    provider.report(paid_session(&session_id, 6500));
    let outcome = ctx.reconciler.confirm_from_callback(donation.id, &at).await?;
    assert!(matches!(outcome, ReconcileOutcome::Completed(_)));

    Ok(())
}

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::PaymentsConfig,
    domain::{
        meals_for_amount, CreateDonationRequest, Donation, DonationCompletion, LedgerConflict,
        Moment, PaymentStatus,
    },
    error::{AppError, Result},
    payments::{
        provider::{CheckoutProvider, CheckoutRequest, CheckoutSession},
        session::{ProviderPaymentStatus, SessionData},
        webhook::{self, WebhookEnvelope, CHECKOUT_SESSION_COMPLETED, CHECKOUT_SESSION_EXPIRED},
    },
    service::donation_ledger::{DonationLedger, LedgerOutcome},
};

/// Result of reconciling a donation against the provider.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call completed the donation.
    Completed(Donation),
    /// Someone else already completed it; nothing was written.
    AlreadyCompleted(Donation),
    /// The provider says the payment will never arrive.
    Failed(Donation),
    /// Not eligible for completion; nothing was written.
    Refused { donation: Donation, reason: String },
    /// Provider status is neither paid nor a terminal failure.
    Unresolved { donation: Donation, provider_status: String },
}

impl ReconcileOutcome {
    pub fn donation(&self) -> &Donation {
        match self {
            ReconcileOutcome::Completed(d)
            | ReconcileOutcome::AlreadyCompleted(d)
            | ReconcileOutcome::Failed(d) => d,
            ReconcileOutcome::Refused { donation, .. }
            | ReconcileOutcome::Unresolved { donation, .. } => donation,
        }
    }

    /// True when the donation is completed, by this call or an earlier one.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Completed(_) | ReconcileOutcome::AlreadyCompleted(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Completed(_) => "completed",
            ReconcileOutcome::AlreadyCompleted(_) => "already_completed",
            ReconcileOutcome::Failed(_) => "failed",
            ReconcileOutcome::Refused { .. } => "refused",
            ReconcileOutcome::Unresolved { .. } => "unresolved",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Donation),
    /// The donation had already left `pending`; it was not touched.
    Ignored { donation: Donation, warning: String },
}

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Handled(ReconcileOutcome),
    /// Accepted without action.
    Ignored(String),
}

/// Drives donations through checkout and reconciles provider reports with
/// the ledger. Every entry point is safe to call more than once.
pub struct PaymentReconciler {
    ledger: Arc<DonationLedger>,
    provider: Option<Arc<dyn CheckoutProvider>>,
    config: PaymentsConfig,
    callback_base_url: String,
}

impl PaymentReconciler {
    pub fn new(
        ledger: Arc<DonationLedger>,
        provider: Option<Arc<dyn CheckoutProvider>>,
        config: PaymentsConfig,
        callback_base_url: &str,
    ) -> Self {
        Self {
            ledger,
            provider,
            config,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn provider(&self) -> Result<&Arc<dyn CheckoutProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| AppError::External("Online payments are not configured".to_string()))
    }

    /// Record a pending donation and open its checkout session.
    pub async fn start_donation(
        &self,
        request: &CreateDonationRequest,
        customer_email: Option<String>,
        at: &Moment,
    ) -> Result<(Donation, CheckoutSession)> {
        let meal_count = match request.meal_count {
            Some(count) => count,
            None => meals_for_amount(request.amount_centavos, self.config.meal_price_centavos),
        };
        if meal_count < 1 {
            return Err(AppError::Validation(format!(
                "amount_centavos: must cover at least one meal ({} centavos)",
                self.config.meal_price_centavos
            )));
        }

        let donation = self
            .ledger
            .create_pending_donation(request, meal_count, at)
            .await?;
        let session = self
            .create_checkout_session(&donation, customer_email, at)
            .await?;
        let donation = self.ledger.get(donation.id).await?;

        Ok((donation, session))
    }

    /// Open a hosted checkout for a pending donation and store the session
    /// on it. A provider failure leaves the donation exactly as it was.
    pub async fn create_checkout_session(
        &self,
        donation: &Donation,
        customer_email: Option<String>,
        at: &Moment,
    ) -> Result<CheckoutSession> {
        if !donation.is_pending() {
            return Err(AppError::StateConflict(
                "Checkout can only be opened for a pending donation".to_string(),
            ));
        }

        let request = CheckoutRequest {
            donation_id: donation.id,
            amount_centavos: donation.amount_centavos,
            meal_count: donation.meal_count,
            currency: self.config.currency.clone(),
            description: format!("Donation of {} meal(s)", donation.meal_count),
            customer_email,
            success_url: format!("{}/donations/{}/success", self.callback_base_url, donation.id),
            cancel_url: format!("{}/donations/{}/cancel", self.callback_base_url, donation.id),
            expires_at: self.session_expiry(at),
            payment_method_types: self.config.payment_method_types.clone(),
        };

        let session = self.provider()?.create_checkout_session(&request).await?;
        self.ledger
            .attach_checkout_session(donation.id, &session.id, Some(&session.raw), at)
            .await?;

        Ok(session)
    }

    fn session_expiry(&self, at: &Moment) -> DateTime<Utc> {
        at.utc + Duration::minutes(self.config.session_ttl_minutes.max(1))
    }

    /// Current session state straight from the provider.
    pub async fn retrieve_checkout_session(&self, session_id: &str) -> Result<Option<SessionData>> {
        self.provider()?.retrieve_checkout_session(session_id).await
    }

    /// Browser landed on the success URL: verify with the provider and
    /// complete if paid.
    pub async fn confirm_from_callback(&self, donation_id: Uuid, at: &Moment) -> Result<ReconcileOutcome> {
        let donation = self.ledger.get(donation_id).await?;
        self.process_payment_completion(&donation, None, at).await
    }

    /// The reconciliation routine. Guard order: completed is an idempotent
    /// success, failed is never resurrected, and without session data
    /// nothing changes. Only a `paid` session that matches the donation's
    /// session id and amount completes it.
    pub async fn process_payment_completion(
        &self,
        donation: &Donation,
        session: Option<SessionData>,
        at: &Moment,
    ) -> Result<ReconcileOutcome> {
        match donation.payment_status {
            PaymentStatus::Completed => {
                tracing::info!(
                    target: "bitebank::idempotency",
                    "Donation {} already completed",
                    donation.id
                );
                return Ok(ReconcileOutcome::AlreadyCompleted(donation.clone()));
            }
            PaymentStatus::Failed => {
                return Ok(refused(donation, "Failed payments cannot be completed"));
            }
            PaymentStatus::Pending => {}
        }

        let session = match session {
            Some(session) => session,
            None => match self.fetch_session(donation).await? {
                Some(session) => session,
                None => return Ok(refused(donation, "No session data available")),
            },
        };

        match self.apply_session(donation, &session, at).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_unexpected() => {
                tracing::error!(
                    "Reconciliation of donation {} failed unexpectedly, marking failed: {}",
                    donation.id,
                    e
                );
                if let Err(fail_err) = self.ledger.mark_failed(donation, at).await {
                    tracing::error!(
                        "Could not mark donation {} failed: {}",
                        donation.id,
                        fail_err
                    );
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_session(&self, donation: &Donation) -> Result<Option<SessionData>> {
        let Some(session_id) = donation.checkout_session_id.as_deref() else {
            return Ok(None);
        };
        if self.provider.is_none() {
            return Ok(None);
        }
        self.retrieve_checkout_session(session_id).await
    }

    async fn apply_session(
        &self,
        donation: &Donation,
        session: &SessionData,
        at: &Moment,
    ) -> Result<ReconcileOutcome> {
        match &session.payment_status {
            ProviderPaymentStatus::Paid => {
                verify_integrity(donation, session)?;

                let completion = DonationCompletion {
                    checkout_session_id: session.id.clone(),
                    payment_intent_id: session.payment_intent.clone(),
                    provider_metadata: Some(session.to_metadata()),
                };
                Ok(match self.ledger.mark_completed(donation, &completion, at).await? {
                    LedgerOutcome::Applied(d) => ReconcileOutcome::Completed(d),
                    LedgerOutcome::AlreadyHandled {
                        donation,
                        conflict: LedgerConflict::AlreadyCompleted,
                    } => ReconcileOutcome::AlreadyCompleted(donation),
                    LedgerOutcome::AlreadyHandled {
                        donation,
                        conflict: LedgerConflict::AlreadyFailed,
                    } => refused(&donation, "Failed payments cannot be completed"),
                })
            }
            status if status.is_terminal_failure() => {
                Ok(match self.ledger.mark_failed(donation, at).await? {
                    LedgerOutcome::Applied(d) => {
                        tracing::info!(
                            "Donation {} failed: provider reported {}",
                            d.id,
                            status.as_str()
                        );
                        ReconcileOutcome::Failed(d)
                    }
                    LedgerOutcome::AlreadyHandled {
                        donation,
                        conflict: LedgerConflict::AlreadyCompleted,
                    } => ReconcileOutcome::AlreadyCompleted(donation),
                    LedgerOutcome::AlreadyHandled { donation, .. } => {
                        ReconcileOutcome::Failed(donation)
                    }
                })
            }
            status => {
                tracing::info!(
                    "Donation {} left pending: provider status {}",
                    donation.id,
                    status.as_str()
                );
                Ok(ReconcileOutcome::Unresolved {
                    donation: donation.clone(),
                    provider_status: status.as_str().to_string(),
                })
            }
        }
    }

    /// Donor backed out. Only a pending donation is touched; anything else
    /// is reported back as a warning.
    pub async fn mark_payment_cancelled(&self, donation_id: Uuid, at: &Moment) -> Result<CancelOutcome> {
        let donation = self.ledger.get(donation_id).await?;

        match self.ledger.mark_cancelled(&donation, at).await? {
            LedgerOutcome::Applied(d) => {
                tracing::info!("Donation {} cancelled by donor", d.id);
                Ok(CancelOutcome::Cancelled(d))
            }
            LedgerOutcome::AlreadyHandled { donation, conflict } => {
                let warning = format!("Donation could not be cancelled: {}", conflict);
                tracing::warn!("Cancel callback for donation {}: {}", donation.id, conflict);
                Ok(CancelOutcome::Ignored { donation, warning })
            }
        }
    }

    /// Route a provider webhook. Unknown event types are acknowledged and
    /// ignored; session events without a session object or id are rejected.
    pub async fn process_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        at: &Moment,
    ) -> Result<WebhookOutcome> {
        if let Some(secret) = self.config.webhook_secret.as_deref().filter(|s| !s.is_empty()) {
            let header = signature.ok_or_else(|| {
                tracing::warn!(target: "bitebank::security", "Webhook without signature header");
                AppError::BadRequest("Missing webhook signature".to_string())
            })?;
            webhook::verify_signature(header, payload, secret, at.utc)?;
        }

        let envelope = WebhookEnvelope::parse(payload)?;

        match envelope.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                let (object, session_id) = envelope.session_object()?;
                let Some(donation) = self.ledger.find_by_session_id(session_id).await? else {
                    return Ok(unknown_session(session_id));
                };
                let session = SessionData::from_value(object)?;
                let outcome = self
                    .process_payment_completion(&donation, Some(session), at)
                    .await?;
                tracing::info!(
                    "Webhook {} for donation {}: {}",
                    envelope.event_type,
                    donation.id,
                    outcome.label()
                );
                Ok(WebhookOutcome::Handled(outcome))
            }
            CHECKOUT_SESSION_EXPIRED => {
                let (_, session_id) = envelope.session_object()?;
                let Some(donation) = self.ledger.find_by_session_id(session_id).await? else {
                    return Ok(unknown_session(session_id));
                };
                let outcome = match self.ledger.mark_failed(&donation, at).await? {
                    LedgerOutcome::Applied(d) => ReconcileOutcome::Failed(d),
                    LedgerOutcome::AlreadyHandled {
                        donation,
                        conflict: LedgerConflict::AlreadyCompleted,
                    } => ReconcileOutcome::AlreadyCompleted(donation),
                    LedgerOutcome::AlreadyHandled { donation, .. } => ReconcileOutcome::Failed(donation),
                };
                Ok(WebhookOutcome::Handled(outcome))
            }
            other => {
                tracing::info!("Ignoring webhook event type {}", other);
                Ok(WebhookOutcome::Ignored(format!("Unhandled event type {}", other)))
            }
        }
    }
}

/// Session id and amount must both match what we sent the donor to pay.
fn verify_integrity(donation: &Donation, session: &SessionData) -> Result<()> {
    if donation.checkout_session_id.as_deref() != Some(session.id.as_str()) {
        tracing::warn!(
            target: "bitebank::security",
            "Session mismatch for donation {}: expected {:?}, provider sent {}",
            donation.id,
            donation.checkout_session_id,
            session.id
        );
        return Err(AppError::IntegrityMismatch(format!(
            "session id mismatch for donation {}",
            donation.id
        )));
    }

    if session.amount_total != donation.amount_centavos {
        tracing::warn!(
            target: "bitebank::security",
            "Amount mismatch for donation {}: expected {}, provider sent {}",
            donation.id,
            donation.amount_centavos,
            session.amount_total
        );
        return Err(AppError::IntegrityMismatch(format!(
            "amount mismatch for donation {}",
            donation.id
        )));
    }

    Ok(())
}

fn refused(donation: &Donation, reason: &str) -> ReconcileOutcome {
    tracing::info!(
        target: "bitebank::idempotency",
        "Refusing completion of donation {}: {}",
        donation.id,
        reason
    );
    ReconcileOutcome::Refused {
        donation: donation.clone(),
        reason: reason.to_string(),
    }
}

fn unknown_session(session_id: &str) -> WebhookOutcome {
    tracing::warn!("Webhook for unknown checkout session {}", session_id);
    WebhookOutcome::Ignored(format!("No donation for session {}", session_id))
}

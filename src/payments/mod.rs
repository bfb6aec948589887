pub mod http_provider;
pub mod provider;
pub mod reconciler;
pub mod session;
pub mod webhook;

pub use http_provider::HttpCheckoutProvider;
pub use provider::{CheckoutProvider, CheckoutRequest, CheckoutSession};
pub use reconciler::{CancelOutcome, PaymentReconciler, ReconcileOutcome, WebhookOutcome};
pub use session::{ProviderPaymentStatus, SessionData};

pub mod donation_ledger;
pub mod inventory_service;
pub mod metrics_service;
pub mod time_slot_service;
pub mod voucher_service;

use std::sync::Arc;
use sqlx::SqlitePool;
use crate::config::Settings;
use crate::domain::Clock;
use crate::events::{EventBus, MetricsProjector};
use crate::payments::{CheckoutProvider, PaymentReconciler};
use crate::repository::*;
use donation_ledger::DonationLedger;
use inventory_service::InventoryService;
use metrics_service::MetricsService;
use time_slot_service::TimeSlotService;
use voucher_service::VoucherService;

pub use donation_ledger::LedgerOutcome;

pub struct ServiceContext {
    pub clock: Clock,
    pub event_bus: Arc<EventBus>,
    pub ledger: Arc<DonationLedger>,
    pub inventory: Arc<InventoryService>,
    pub vouchers: Arc<VoucherService>,
    pub time_slots: Arc<TimeSlotService>,
    pub metrics: Arc<MetricsService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    /// Wire repositories, services and the metrics projection over one pool.
    pub async fn new(
        db_pool: SqlitePool,
        settings: &Settings,
        provider: Option<Arc<dyn CheckoutProvider>>,
    ) -> Self {
        let clock = Clock::new(settings.campus.utc_offset_minutes);

        let donation_repo: Arc<dyn DonationRepository> =
            Arc::new(SqliteDonationRepository::new(db_pool.clone()));
        let unit_repo: Arc<dyn MealUnitRepository> =
            Arc::new(SqliteMealUnitRepository::new(db_pool.clone()));
        let voucher_repo: Arc<dyn VoucherRepository> =
            Arc::new(SqliteVoucherRepository::new(db_pool.clone()));
        let slot_repo: Arc<dyn TimeSlotRepository> =
            Arc::new(SqliteTimeSlotRepository::new(db_pool.clone()));
        let metric_repo: Arc<dyn MetricRepository> =
            Arc::new(SqliteMetricRepository::new(db_pool.clone()));

        let event_bus = Arc::new(EventBus::new());
        event_bus
            .register(Arc::new(MetricsProjector::new(metric_repo.clone())))
            .await;

        let inventory = Arc::new(InventoryService::new(
            unit_repo.clone(),
            event_bus.clone(),
            settings.campus.meal_unit_ttl_days,
        ));
        let ledger = Arc::new(DonationLedger::new(
            donation_repo.clone(),
            inventory.clone(),
            event_bus.clone(),
        ));
        let vouchers = Arc::new(VoucherService::new(
            voucher_repo.clone(),
            unit_repo.clone(),
            slot_repo.clone(),
            event_bus.clone(),
        ));
        let time_slots = Arc::new(TimeSlotService::new(slot_repo, voucher_repo.clone()));
        let metrics = Arc::new(MetricsService::new(
            metric_repo,
            donation_repo,
            unit_repo,
            voucher_repo,
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            ledger.clone(),
            provider,
            settings.payments.clone(),
            &settings.server.base_url,
        ));

        Self {
            clock,
            event_bus,
            ledger,
            inventory,
            vouchers,
            time_slots,
            metrics,
            reconciler,
            db_pool,
        }
    }
}

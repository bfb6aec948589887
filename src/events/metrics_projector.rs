use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    domain::{metric::*, DomainEvent, Moment},
    error::Result,
    events::EventHandler,
    repository::MetricRepository,
};

/// Keeps the dashboard counters in step with committed transitions.
///
/// Counters are a projection: `MetricsService::recount` can always rebuild
/// them from the donation, meal unit and voucher tables.
pub struct MetricsProjector {
    repo: Arc<dyn MetricRepository>,
}

impl MetricsProjector {
    pub fn new(repo: Arc<dyn MetricRepository>) -> Self {
        Self { repo }
    }

    /// Counter deltas implied by one event.
    pub fn deltas(event: &DomainEvent) -> Vec<(&'static str, i64)> {
        match event {
            DomainEvent::DonationCompleted {
                amount_centavos,
                meal_count,
                first_for_donor,
                ..
            } => {
                let meals = i64::from(*meal_count);
                let mut deltas = vec![
                    (TOTAL_DONATIONS_RECEIVED, *amount_centavos),
                    (TOTAL_MEALS_DONATED, meals),
                    (TOTAL_MEALS_AVAILABLE, meals),
                ];
                if *first_for_donor {
                    deltas.push((TOTAL_DONORS, 1));
                }
                deltas
            }
            DomainEvent::VoucherIssued { meal_unit_id, .. } => {
                let mut deltas = vec![(TOTAL_VOUCHERS_ISSUED, 1)];
                if meal_unit_id.is_some() {
                    deltas.push((TOTAL_MEALS_AVAILABLE, -1));
                }
                deltas
            }
            DomainEvent::VoucherClaimed { .. } => vec![(TOTAL_MEALS_CLAIMED, 1)],
            DomainEvent::VoucherExpired { released_meal_unit, .. }
            | DomainEvent::VoucherCancelled { released_meal_unit, .. } => {
                if released_meal_unit.is_some() {
                    vec![(TOTAL_MEALS_AVAILABLE, 1)]
                } else {
                    Vec::new()
                }
            }
            DomainEvent::MealUnitsExpired { count } => vec![(TOTAL_MEALS_AVAILABLE, -*count)],
        }
    }
}

#[async_trait]
impl EventHandler for MetricsProjector {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle_event(&self, event: &DomainEvent, at: &Moment) -> Result<()> {
        for (name, delta) in Self::deltas(event) {
            if delta != 0 {
                self.repo.adjust(name, delta, at.utc).await?;
            }
        }
        Ok(())
    }
}

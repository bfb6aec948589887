use std::sync::Arc;

use crate::{
    domain::{metric::*, Moment, SystemMetric, VoucherStatus},
    error::{AppError, Result},
    repository::{DonationRepository, MealUnitRepository, MetricRepository, VoucherRepository},
};

/// Dashboard counters. Bookkeeping only: the tables are the source of
/// truth and `recount` rebuilds every counter from them.
pub struct MetricsService {
    repo: Arc<dyn MetricRepository>,
    donation_repo: Arc<dyn DonationRepository>,
    unit_repo: Arc<dyn MealUnitRepository>,
    voucher_repo: Arc<dyn VoucherRepository>,
}

impl MetricsService {
    pub fn new(
        repo: Arc<dyn MetricRepository>,
        donation_repo: Arc<dyn DonationRepository>,
        unit_repo: Arc<dyn MealUnitRepository>,
        voucher_repo: Arc<dyn VoucherRepository>,
    ) -> Self {
        Self {
            repo,
            donation_repo,
            unit_repo,
            voucher_repo,
        }
    }

    /// Missing counters read as zero.
    pub async fn get(&self, name: &str) -> Result<i64> {
        Ok(self
            .repo
            .get(name)
            .await?
            .map(|m| m.metric_value)
            .unwrap_or(0))
    }

    pub async fn list(&self) -> Result<Vec<SystemMetric>> {
        self.repo.list().await
    }

    pub async fn set(&self, name: &str, value: i64, at: &Moment) -> Result<SystemMetric> {
        check_name(name)?;
        if value < 0 {
            return Err(AppError::Validation(
                "metric_value: counters cannot be negative".to_string(),
            ));
        }
        self.repo.set(name, value, at.utc).await
    }

    pub async fn increment(&self, name: &str, delta: i64, at: &Moment) -> Result<SystemMetric> {
        check_name(name)?;
        self.repo.adjust(name, delta.abs(), at.utc).await
    }

    /// Floors at zero.
    pub async fn decrement(&self, name: &str, delta: i64, at: &Moment) -> Result<SystemMetric> {
        check_name(name)?;
        self.repo.adjust(name, -delta.abs(), at.utc).await
    }

    pub async fn reset(&self, name: &str, at: &Moment) -> Result<SystemMetric> {
        check_name(name)?;
        tracing::warn!("Counter {} reset to 0", name);
        self.repo.set(name, 0, at.utc).await
    }

    /// Rebuild every known counter from the donation, meal unit and voucher
    /// tables.
    pub async fn recount(&self, at: &Moment) -> Result<Vec<SystemMetric>> {
        let totals = self.donation_repo.completed_totals().await?;
        let inventory = self.unit_repo.summary().await?;
        let issued = self.voucher_repo.count_all().await?;
        let claimed = self.voucher_repo.count_by_status(VoucherStatus::Claimed).await?;

        let values = [
            (TOTAL_DONATIONS_RECEIVED, totals.amount_centavos),
            (TOTAL_DONORS, totals.donors),
            (TOTAL_MEALS_DONATED, totals.meal_count),
            (TOTAL_MEALS_AVAILABLE, inventory.available),
            (TOTAL_VOUCHERS_ISSUED, issued),
            (TOTAL_MEALS_CLAIMED, claimed),
        ];

        let mut metrics = Vec::with_capacity(values.len());
        for (name, value) in values {
            let before = self.get(name).await?;
            if before != value {
                tracing::warn!("Counter {} drifted: stored {}, recounted {}", name, before, value);
            }
            metrics.push(self.repo.set(name, value, at.utc).await?);
        }

        Ok(metrics)
    }
}

fn check_name(name: &str) -> Result<()> {
    if !is_valid_metric_name(name) {
        return Err(AppError::Validation(format!(
            "metric_name: {} is not a valid counter name",
            name
        )));
    }
    Ok(())
}

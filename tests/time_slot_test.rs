mod common;

use bitebank::{
    domain::{
        CreateTimeSlotRequest, IssueVoucherRequest, MealSource, StudentSnapshot,
        UpdateTimeSlotRequest,
    },
    error::AppError,
    service::ServiceContext,
};
use chrono::NaiveTime;
use common::*;
use uuid::Uuid;

fn slot(name: &str, start: NaiveTime, end: NaiveTime) -> CreateTimeSlotRequest {
    CreateTimeSlotRequest {
        display_name: name.to_string(),
        start_time: start,
        end_time: end,
        is_active: true,
    }
}

async fn book(ctx: &ServiceContext, slot_id: Uuid) -> anyhow::Result<Uuid> {
    let at = manila(10, 9, 0);
    let request = IssueVoucherRequest {
        student_id: None,
        time_slot_id: slot_id,
        scheduled_date: at.today(),
        meal_source: MealSource::Managed,
        student: StudentSnapshot::default(),
    };
    Ok(ctx.vouchers.issue(&request, &at).await?.id)
}

#[tokio::test]
async fn test_overlapping_windows_are_rejected() -> anyhow::Result<()> {
    let ctx = context(None).await?;
    let at = manila(10, 8, 0);
    lunch_slot(&ctx).await?;

    let clashes = [
        ("starts inside", time(12, 0), time(14, 0)),
        ("ends inside", time(10, 0), time(11, 30)),
        ("encloses", time(10, 0), time(14, 0)),
        ("enclosed", time(11, 30), time(12, 30)),
    ];
    for (name, start, end) in clashes {
        let err = ctx.time_slots.create(slot(name, start, end), &at).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)), "{}: {:?}", name, err);
    }

    // Windows are half-open, so back-to-back slots are fine
    ctx.time_slots
        .create(slot("Early", time(10, 0), time(11, 0)), &at)
        .await?;
    ctx.time_slots
        .create(slot("Late", time(13, 1), time(14, 0)), &at)
        .await?;

    assert_eq!(ctx.time_slots.list(false).await?.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_window_must_be_forward() -> anyhow::Result<()> {
    let ctx = context(None).await?;

    let err = ctx
        .time_slots
        .create(slot("Backwards", time(13, 0), time(12, 0)), &manila(10, 8, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = ctx
        .time_slots
        .create(slot("Empty", time(12, 0), time(12, 0)), &manila(10, 8, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_inactive_slots_do_not_block() -> anyhow::Result<()> {
    let ctx = context(None).await?;
    let at = manila(10, 8, 0);
    let lunch = lunch_slot(&ctx).await?;

    let mut spare = slot("Spare", time(11, 30), time(12, 30));
    spare.is_active = false;
    let spare = ctx.time_slots.create(spare, &at).await?;

    // Re-activating it would clash with lunch
    let err = ctx
        .time_slots
        .update(
            spare.id,
            UpdateTimeSlotRequest {
                is_active: Some(true),
                ..Default::default()
            },
            &at,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Moving lunch within its own window is not a clash with itself
    let moved = ctx
        .time_slots
        .update(
            lunch.id,
            UpdateTimeSlotRequest {
                end_time: Some(time(12, 45)),
                ..Default::default()
            },
            &at,
        )
        .await?;
    assert_eq!(moved.end_time, time(12, 45));

    assert_eq!(ctx.time_slots.list(false).await?.len(), 1);
    assert_eq!(ctx.time_slots.list(true).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_delete_guarded_by_active_vouchers() -> anyhow::Result<()> {
    let ctx = context(None).await?;
    let lunch = lunch_slot(&ctx).await?;
    let voucher_id = book(&ctx, lunch.id).await?;

    let err = ctx.time_slots.delete(lunch.id).await.unwrap_err();
    assert!(matches!(err, AppError::StateConflict(_)));

    ctx.vouchers
        .cancel(voucher_id, Uuid::new_v4(), "Slot retired", &manila(10, 9, 30))
        .await?;

    ctx.time_slots.delete(lunch.id).await?;
    let err = ctx.time_slots.get(lunch.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    Ok(())
}

use bitebank::{
    config::{DatabaseConfig, Settings},
    database,
    domain::{default_time_slots, CreateTimeSlotRequest},
    service::ServiceContext,
};
use chrono::NaiveTime;
use clap::Parser;

/// Prepare a BiteBank database: run migrations and seed the default lunch
/// time slots.
#[derive(Parser, Debug)]
#[command(name = "seed", version)]
struct Args {
    /// Database URL; defaults to the configured one
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Only run migrations
    #[arg(long)]
    migrate_only: bool,

    /// Recount dashboard counters from the tables after seeding
    #[arg(long)]
    recount: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::new().unwrap_or_default();
    let database = DatabaseConfig {
        url: args.database_url.unwrap_or_else(|| settings.database.url.clone()),
        max_connections: 1,
    };

    println!("Running migrations against {}", database.url);
    let db_pool = database::connect(&database).await?;

    if args.migrate_only {
        println!("Migrations applied");
        return Ok(());
    }

    let ctx = ServiceContext::new(db_pool, &settings, None).await;
    let at = ctx.clock.now();

    let existing = ctx.time_slots.list(true).await?;
    if existing.is_empty() {
        for (name, (start_h, start_m), (end_h, end_m)) in default_time_slots() {
            let (Some(start_time), Some(end_time)) = (
                NaiveTime::from_hms_opt(start_h, start_m, 0),
                NaiveTime::from_hms_opt(end_h, end_m, 0),
            ) else {
                anyhow::bail!("Invalid default time slot {}", name);
            };

            let slot = ctx
                .time_slots
                .create(
                    CreateTimeSlotRequest {
                        display_name: name.to_string(),
                        start_time,
                        end_time,
                        is_active: true,
                    },
                    &at,
                )
                .await?;
            println!("  Created time slot {}", slot.display_name);
        }
    } else {
        println!("  {} time slots already present, skipping", existing.len());
    }

    if args.recount {
        for metric in ctx.metrics.recount(&at).await? {
            println!("  {} = {}", metric.metric_name, metric.metric_value);
        }
    }

    println!("Seeding complete");
    Ok(())
}

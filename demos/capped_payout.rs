//! The cycle engine against a daily cap.
//!
//! A qualified root with 100 volume on each leg is paid on two consecutive
//! days: the cap of 4 cycles per day bounds each payout.

use binary_engine::core::config::EngineConfig;
use binary_engine::core::context::RequestContext;
use binary_engine::core::member::{NewMember, Side};
use binary_engine::engine::CompensationPlan;
use binary_engine::store::{MemberStore, MemoryStore, Stores};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("╔══════════════════════════════════════════╗");
    println!("║  binary-engine: Capped Payout Example    ║");
    println!("╚══════════════════════════════════════════╝\n");

    let store = Arc::new(MemoryStore::new());
    let plan = CompensationPlan::new(Stores::from_memory(store.clone()), EngineConfig::default());
    let today = RequestContext::background();

    let root = plan
        .placement
        .place(&today, NewMember::named("Root"), None, None)
        .await?
        .member
        .id;
    for side in [Side::Left, Side::Right] {
        let direct = plan
            .placement
            .place(&today, NewMember::named(side.as_str()), Some(&root), Some(side))
            .await?
            .member
            .id;
        plan.placement.record_sale(&today, &direct, dec!(1)).await?;
    }
    store
        .update_volumes(&today, &root, dec!(100), dec!(100))
        .await?;

    println!("━━━ Day 1 ━━━\n");
    println!("{}", plan.commission.compute_binary_commission(&today, &root).await?);

    println!("━━━ Day 1, second run ━━━\n");
    println!("{}", plan.commission.compute_binary_commission(&today, &root).await?);

    println!("━━━ Day 2 ━━━\n");
    let tomorrow = RequestContext::background().at(today.now() + Duration::days(1));
    println!("{}", plan.commission.compute_binary_commission(&tomorrow, &root).await?);

    let member = store.get(&today, &root).await?;
    println!(
        "Lifetime: {} cycles, {} earned (as of {})",
        member.cycle_count,
        member.total_earnings,
        Utc::now().date_naive()
    );
    Ok(())
}

//! Enrollment, spillover placement and volume propagation.
//!
//! Builds a small tree under one sponsor, records a few sales and shows how
//! volume climbs the ancestor chain until a binary match fires.

use binary_engine::core::config::EngineConfig;
use binary_engine::core::context::RequestContext;
use binary_engine::core::member::{NewMember, Side};
use binary_engine::engine::CompensationPlan;
use binary_engine::store::{MemoryStore, Stores};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("╔══════════════════════════════════════════════╗");
    println!("║  binary-engine: Placement & Volume Example   ║");
    println!("╚══════════════════════════════════════════════╝\n");

    let store = Arc::new(MemoryStore::new());
    let plan = CompensationPlan::new(Stores::from_memory(store.clone()), EngineConfig::default());
    let ctx = RequestContext::background();

    // --- Scenario 1: Explicit placement ---
    println!("━━━ Scenario 1: Explicit Placement ━━━\n");

    let root = plan
        .placement
        .place(&ctx, NewMember::named("Ana"), None, None)
        .await?
        .member;
    println!("Root:  {} (code {})", root.name, root.code);

    let left = plan
        .placement
        .place(&ctx, NewMember::named("Bruno"), Some(&root.id), Some(Side::Left))
        .await?;
    let right = plan
        .placement
        .place(&ctx, NewMember::named("Carla"), Some(&root.id), Some(Side::Right))
        .await?;
    println!("Left:  {} (code {})", left.member.name, left.member.code);
    println!("Right: {} (code {})", right.member.name, right.member.code);

    match plan
        .placement
        .place(&ctx, NewMember::named("Dario"), Some(&root.id), Some(Side::Left))
        .await
    {
        Ok(_) => println!("unexpected: a full sponsor accepted a placement"),
        Err(e) => println!("Full sponsor rejected: {}", e),
    }
    println!();

    // --- Scenario 2: Spillover ---
    println!("━━━ Scenario 2: Breadth-First Spillover ━━━\n");

    for name in ["Dario", "Elena", "Fabio"] {
        let p = plan
            .placement
            .place(&ctx, NewMember::named(name), Some(&root.id), None)
            .await?;
        if let (Some(parent), Some(side)) = (&p.parent, p.side) {
            println!("  {:<6} → {} side of {}", name, side, parent);
        }
    }
    println!();

    // --- Scenario 3: Sales climb the tree ---
    println!("━━━ Scenario 3: Sale Propagation ━━━\n");

    let prop = plan
        .placement
        .record_sale(&ctx, &left.member.id, dec!(40))
        .await?;
    println!("Sale of 40 by {} credited {} ancestors", left.member.name, prop.credited.len());

    let prop = plan
        .placement
        .record_sale(&ctx, &right.member.id, dec!(60))
        .await?;
    for m in &prop.matches {
        println!("Binary match: {} matched {} and earned {}", m.member_id, m.matched_volume, m.amount);
    }
    println!();

    let tree = plan.tree.get_client_tree(&ctx, &root.id).await?;
    println!("{}", tree);
    Ok(())
}

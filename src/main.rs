//! binary-engine CLI
//!
//! Drive placements, sales and payouts against a JSON store file.
//!
//! # Usage
//!
//! ```bash
//! # Enroll a root, then a member under it
//! binary-engine place --store net.json --name "Alice"
//! binary-engine place --store net.json --name "Bob" --sponsor 48213377 --position left
//!
//! # Record a sale and run the cycle engine
//! binary-engine sale --store net.json --member 48213377 --amount 120
//! binary-engine commission --store net.json --member 48213377 --format json
//!
//! # Inspect the tree
//! binary-engine tree --store net.json --root 48213377
//! ```

use binary_engine::core::config::EngineConfig;
use binary_engine::core::context::RequestContext;
use binary_engine::core::member::{is_valid_member_code, MemberId, NewMember};
use binary_engine::engine::{parse_position, CompensationPlan};
use binary_engine::simulation::network_gen::{generate_network, NetworkConfig};
use binary_engine::store::{MemberStore, MemoryStore, StoreSnapshot, Stores};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn print_usage() {
    eprintln!(
        r#"binary-engine: binary compensation plan: placement, volume and cycle payouts

USAGE:
    binary-engine <COMMAND> [OPTIONS]

COMMANDS:
    place       Enroll a member (as a root, or under a sponsor)
    sale        Record a sale and propagate its volume upward
    commission  Run the qualified, capped cycle payout for a member
    match       Run the threshold binary match for a member
    tree        Print the annotated tree under a member
    generate    Grow a random network (for testing)
    help        Show this message

COMMON OPTIONS:
    --store <FILE>      JSON store file (created if missing)
    --config <FILE>     JSON engine config (default: environment, then built-ins)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS:
    place       --name <NAME> [--sponsor <ID|CODE>] [--position left|right]
    sale        --member <ID|CODE> --amount <N>
    commission  --member <ID|CODE>
    match       --member <ID|CODE>
    tree        --root <ID|CODE>
    generate    [--members <N>] [--seed <N>] [--sale-probability <P>]

EXAMPLES:
    binary-engine generate --store net.json --members 50 --seed 7
    binary-engine commission --store net.json --member 48213377
    RUST_LOG=debug binary-engine tree --store net.json --root 48213377"#
    );
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", msg);
    process::exit(1);
}

/// `--key value` pairs, restricted to `allowed` plus the common options.
fn parse_flags(args: &[String], allowed: &[&str]) -> HashMap<String, String> {
    let mut flags = HashMap::new();
    let mut i = 0;
    while i < args.len() {
        let key = args[i].as_str();
        let name = key.strip_prefix("--").unwrap_or_else(|| fail(format!("unexpected argument: {}", key)));
        if !allowed.contains(&name) && !["store", "config", "format"].contains(&name) {
            fail(format!("unknown option: {}", key));
        }
        i += 1;
        let value = args
            .get(i)
            .cloned()
            .unwrap_or_else(|| fail(format!("{} requires a value", key)));
        flags.insert(name.to_string(), value);
        i += 1;
    }
    flags
}

fn required<'a>(flags: &'a HashMap<String, String>, name: &str) -> &'a str {
    flags
        .get(name)
        .map(String::as_str)
        .unwrap_or_else(|| fail(format!("--{} is required", name)))
}

struct Session {
    store: Arc<MemoryStore>,
    plan: CompensationPlan,
    path: String,
    json: bool,
}

impl Session {
    fn open(flags: &HashMap<String, String>) -> Self {
        let path = required(flags, "store").to_string();
        let snapshot = if Path::new(&path).exists() {
            let content = fs::read_to_string(&path)
                .unwrap_or_else(|e| fail(format!("reading '{}': {}", path, e)));
            serde_json::from_str::<StoreSnapshot>(&content)
                .unwrap_or_else(|e| fail(format!("parsing '{}': {}", path, e)))
        } else {
            StoreSnapshot::default()
        };

        let config = match flags.get("config") {
            Some(cfg) => {
                let content = fs::read_to_string(cfg)
                    .unwrap_or_else(|e| fail(format!("reading '{}': {}", cfg, e)));
                EngineConfig::from_json(&content).unwrap_or_else(|e| fail(e))
            }
            None => {
                let config = EngineConfig::from_env();
                config.validate().unwrap_or_else(|e| fail(e));
                config
            }
        };

        let store = Arc::new(MemoryStore::from_snapshot(snapshot, true));
        let plan = CompensationPlan::new(Stores::from_memory(store.clone()), config);
        let json = flags.get("format").map(|f| f == "json").unwrap_or(false);
        Self {
            store,
            plan,
            path,
            json,
        }
    }

    /// Accept a member id or an 8-digit member code.
    async fn resolve(&self, ctx: &RequestContext, raw: &str) -> MemberId {
        if is_valid_member_code(raw) {
            if let Ok(m) = self.store.get_by_code(ctx, raw).await {
                return m.id;
            }
        }
        MemberId::new(raw)
    }

    async fn save(&self) {
        let snapshot = self.store.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot).unwrap_or_else(|e| fail(e));
        fs::write(&self.path, json)
            .unwrap_or_else(|e| fail(format!("writing '{}': {}", self.path, e)));
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|e| fail(e))
            );
        } else {
            println!("{}", text());
        }
    }
}

async fn cmd_place(args: &[String]) {
    let flags = parse_flags(args, &["name", "sponsor", "position"]);
    let session = Session::open(&flags);
    let ctx = RequestContext::background();

    let name = required(&flags, "name");
    let sponsor = match flags.get("sponsor") {
        Some(raw) => Some(session.resolve(&ctx, raw).await),
        None => None,
    };
    let position = flags
        .get("position")
        .map(|p| parse_position(p).unwrap_or_else(|e| fail(e)));

    let placed = session
        .plan
        .placement
        .place(&ctx, NewMember::named(name), sponsor.as_ref(), position)
        .await
        .unwrap_or_else(|e| fail(e));
    session.save().await;

    session.emit(&placed, || {
        let mut out = format!(
            "Enrolled {} (id {}, code {})",
            placed.member.name, placed.member.id, placed.member.code
        );
        if let (Some(parent), Some(side)) = (&placed.parent, placed.side) {
            out.push_str(&format!("\nPlaced under {} on the {}", parent, side));
        }
        if !placed.linked {
            out.push_str("\nWARNING: parent slot could not be linked");
        }
        for m in &placed.propagation.matches {
            out.push_str(&format!("\nBinary match: {} paid {}", m.member_id, m.amount));
        }
        out
    });
}

async fn cmd_sale(args: &[String]) {
    let flags = parse_flags(args, &["member", "amount"]);
    let session = Session::open(&flags);
    let ctx = RequestContext::background();

    let member = session.resolve(&ctx, required(&flags, "member")).await;
    let raw = required(&flags, "amount");
    let amount: Decimal = raw
        .parse()
        .unwrap_or_else(|e| fail(format!("invalid amount '{}': {}", raw, e)));

    let prop = session
        .plan
        .placement
        .record_sale(&ctx, &member, amount)
        .await
        .unwrap_or_else(|e| fail(e));
    session.save().await;

    session.emit(&prop, || {
        let mut out = format!(
            "Recorded sale of {} for {}; {} ancestors credited",
            amount,
            member,
            prop.credited.len()
        );
        for m in &prop.matches {
            out.push_str(&format!("\nBinary match: {} paid {}", m.member_id, m.amount));
        }
        out
    });
}

async fn cmd_commission(args: &[String]) {
    let flags = parse_flags(args, &["member"]);
    let session = Session::open(&flags);
    let ctx = RequestContext::background();

    let member = session.resolve(&ctx, required(&flags, "member")).await;
    let result = session
        .plan
        .commission
        .compute_binary_commission(&ctx, &member)
        .await
        .unwrap_or_else(|e| fail(e));
    session.save().await;

    session.emit(&result, || result.to_string());
}

async fn cmd_match(args: &[String]) {
    let flags = parse_flags(args, &["member"]);
    let session = Session::open(&flags);
    let ctx = RequestContext::background();

    let member = session.resolve(&ctx, required(&flags, "member")).await;
    let result = session
        .plan
        .placement
        .matcher()
        .trigger(&ctx, &member)
        .await
        .unwrap_or_else(|e| fail(e));
    session.save().await;

    session.emit(&result, || result.message.clone());
}

async fn cmd_tree(args: &[String]) {
    let flags = parse_flags(args, &["root"]);
    let session = Session::open(&flags);
    let ctx = RequestContext::background();

    let root = session.resolve(&ctx, required(&flags, "root")).await;
    let tree = session
        .plan
        .tree
        .get_client_tree(&ctx, &root)
        .await
        .unwrap_or_else(|e| fail(e));

    session.emit(&*tree, || tree.to_string());
}

async fn cmd_generate(args: &[String]) {
    let flags = parse_flags(args, &["members", "seed", "sale-probability"]);
    let session = Session::open(&flags);
    let ctx = RequestContext::background();

    let mut config = NetworkConfig::default();
    if let Some(n) = flags.get("members") {
        config.member_count = n
            .parse()
            .unwrap_or_else(|_| fail("--members requires a number"));
    }
    if let Some(s) = flags.get("seed") {
        config.seed = Some(s.parse().unwrap_or_else(|_| fail("--seed requires a number")));
    }
    if let Some(p) = flags.get("sale-probability") {
        config.sale_probability = p
            .parse()
            .unwrap_or_else(|_| fail("--sale-probability requires a number in [0, 1]"));
    }
    config.validate().unwrap_or_else(|e| fail(e));

    let net = generate_network(&ctx, &session.plan.placement, &config)
        .await
        .unwrap_or_else(|e| fail(e));
    session.save().await;

    #[derive(Serialize)]
    struct Summary<'a> {
        root: &'a MemberId,
        members: usize,
        sales: usize,
        binary_matches: usize,
    }
    let summary = Summary {
        root: &net.root,
        members: net.members.len(),
        sales: net.sales,
        binary_matches: net.binary_matches,
    };
    session.emit(&summary, || {
        format!(
            "Generated {} members ({} sales, {} binary matches) rooted at {} → {}",
            summary.members, summary.sales, summary.binary_matches, net.root, session.path
        )
    });
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "place" => cmd_place(rest).await,
        "sale" => cmd_sale(rest).await,
        "commission" => cmd_commission(rest).await,
        "match" => cmd_match(rest).await,
        "tree" => cmd_tree(rest).await,
        "generate" => cmd_generate(rest).await,
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}

use cartsplit::application::checkout::OrderSplitter;
use cartsplit::domain::commission::{
    CommissionRate, CommissionRule, RateKind, RateTarget, RuleScope,
};
use cartsplit::domain::money::Balance;
use cartsplit::domain::ports::{CommissionRuleStore, CommissionRuleStoreRef};
use cartsplit::infrastructure::event_bus::BroadcastEventBus;
use cartsplit::infrastructure::in_memory::{InMemoryCommissionStore, InMemoryOrderStore};
use cartsplit::interfaces::csv::line_item_reader::{LineItemReader, collect_carts};
use cartsplit::interfaces::csv::order_writer::OrderWriter;
use cartsplit::interfaces::csv::rule_reader::RuleReader;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal_macros::dec;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input cart line items CSV file
    input: PathBuf,

    /// Commission rules CSV file. Without it a single global 10%
    /// item-total rule applies.
    #[arg(long)]
    rules: Option<PathBuf>,
}

async fn load_rules(store: &CommissionRuleStoreRef, path: Option<PathBuf>) -> Result<()> {
    let rules = match path {
        Some(path) => {
            let file = File::open(path).into_diagnostic()?;
            RuleReader::new(file).rules().into_diagnostic()?
        }
        None => vec![(
            CommissionRule {
                id: 1,
                code: "global-default".to_string(),
                scope: RuleScope::Global,
                reference_id: None,
                rate_id: 1,
                enabled: true,
            },
            CommissionRate {
                id: 1,
                name: "global default".to_string(),
                kind: RateKind::Percentage,
                target: RateTarget::ItemTotal,
                value: dec!(10),
                currency: "usd".to_string(),
                min_amount: Balance::ZERO,
                include_tax: false,
                priority: 0,
            },
        )],
    };
    for (rule, rate) in rules {
        store.insert_rate(rate).await.into_diagnostic()?;
        store.insert_rule(rule).await.into_diagnostic()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let rule_store: CommissionRuleStoreRef = Arc::new(InMemoryCommissionStore::new());
    load_rules(&rule_store, cli.rules).await?;

    let splitter = OrderSplitter::new(
        Arc::new(InMemoryOrderStore::new()),
        rule_store,
        Arc::new(BroadcastEventBus::new(64)),
    );

    let file = File::open(cli.input).into_diagnostic()?;
    let carts = collect_carts(LineItemReader::new(file).records()).into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = OrderWriter::new(stdout.lock());
    writer.write_header().into_diagnostic()?;

    for cart in carts {
        match splitter.split_cart(&cart).await {
            Ok(placed) => {
                for order in &placed.orders {
                    let (order, lines) = splitter
                        .order_with_commissions(order.id)
                        .await
                        .into_diagnostic()?;
                    writer
                        .write_order(&placed.order_set, &order, &lines)
                        .into_diagnostic()?;
                }
            }
            Err(e) => {
                eprintln!("Error splitting cart {}: {}", cart.id, e);
            }
        }
    }
    writer.flush().into_diagnostic()?;

    Ok(())
}

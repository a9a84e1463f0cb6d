use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;

use card_optimizer::{
    build_wallet, db, resolve_category, stored_wallet, telemetry, transact, AppConfig,
    CardCatalog, CatalogClient, Domain, WalletSelection,
};

#[derive(Parser, Debug)]
#[command(
    name = "card-optimizer",
    about = "Pick the card that earns the most for a purchase and record the choice",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every card key in the catalog
    Cards,
    /// Choose the best card for a purchase and record the transaction
    Transact(TransactArgs),
    /// Choose the best stored card for a category without recording anything
    Best(BestArgs),
    /// Manage merchant domain → category mappings
    Domains {
        #[command(subcommand)]
        command: DomainCommand,
    },
    /// Show recorded transactions
    History,
}

#[derive(Args, Debug)]
struct TransactArgs {
    /// Merchant domain, e.g. amazon.com
    #[arg(long)]
    domain: String,
    /// Purchase amount in dollars
    #[arg(long)]
    amount: f64,
    /// Card keys in the wallet (defaults to the first --limit catalog cards)
    #[arg(long = "card")]
    cards: Vec<String>,
    /// How many catalog cards to use when no --card is given
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

#[derive(Args, Debug)]
struct BestArgs {
    /// Merchant category id
    #[arg(long)]
    category: i64,
    /// Card keys to compare (defaults to every stored card)
    #[arg(long = "card")]
    cards: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum DomainCommand {
    /// Map a single domain to a category
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        category_id: i64,
        #[arg(long)]
        category_name: String,
    },
    /// Import mappings from a CSV with name,category_id,category_name columns
    Import { path: PathBuf },
    /// Show the category for a domain
    Show { name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let conn = db::open_database(&config.database_path)?;
    info!(path = ?config.database_path, "database opened");

    match cli.command {
        Command::Cards => run_cards(&config),
        Command::Transact(args) => run_transact(&config, &conn, args),
        Command::Best(args) => run_best(&conn, args),
        Command::Domains { command } => run_domains(&conn, command),
        Command::History => run_history(&conn),
    }
}

fn catalog_client(config: &AppConfig) -> Result<CatalogClient> {
    let client = CatalogClient::new(config.catalog()?.clone())?;
    Ok(client)
}

fn run_cards(config: &AppConfig) -> Result<()> {
    let catalog = catalog_client(config)?;
    let issuers = catalog.fetch_card_list().context("Failed to fetch card list")?;

    for issuer in &issuers {
        println!("{}", issuer.card_issuer);
        for card in &issuer.cards {
            println!("  {:<40} {}", card.card_key, card.card_name);
        }
    }

    let total: usize = issuers.iter().map(|i| i.cards.len()).sum();
    println!("\n✓ {} cards from {} issuers", total, issuers.len());
    Ok(())
}

fn run_transact(config: &AppConfig, conn: &Connection, args: TransactArgs) -> Result<()> {
    let catalog = catalog_client(config)?;

    let card_keys = if args.cards.is_empty() {
        let mut keys = catalog.card_keys().context("Failed to fetch card list")?;
        keys.truncate(args.limit);
        keys
    } else {
        args.cards
    };

    let wallet = build_wallet(conn, &catalog, &card_keys).context("Failed to build wallet")?;
    let record = transact(conn, &args.domain, args.amount, &wallet)?;

    println!("🛒 {} - ${:.2}", record.merchant.domain_name, record.spend_amount);
    if record.merchant.category_name.is_empty() {
        println!("   Category: unknown (base rates only)");
    } else {
        println!(
            "   Category: {} ({})",
            record.merchant.category_name, record.merchant.category_id
        );
    }
    print_selection(&record.card);
    if !record.card.is_empty() {
        println!("   Earned:   ${:.2}", record.reward_earned());
    }

    Ok(())
}

fn run_best(conn: &Connection, args: BestArgs) -> Result<()> {
    let wallet = stored_wallet(conn, &args.cards)?;
    println!("Comparing {} stored cards for category {}", wallet.len(), args.category);

    print_selection(&wallet.select_best(args.category));
    Ok(())
}

fn run_domains(conn: &Connection, command: DomainCommand) -> Result<()> {
    match command {
        DomainCommand::Add {
            name,
            category_id,
            category_name,
        } => {
            db::insert_domain(conn, &Domain::new(&name, category_id, &category_name))?;
            println!("✓ {} → {} ({})", name, category_name, category_id);
        }
        DomainCommand::Import { path } => {
            let imported = db::import_domains_csv(conn, &path)?;
            println!("✓ Imported {} domains from {:?}", imported, path);
        }
        DomainCommand::Show { name } => {
            let category = resolve_category(conn, &name)?;
            if category.is_resolved() {
                println!("{} → {} ({})", name, category.name(), category.id());
            } else {
                println!("{} has no known category", name);
            }
        }
    }

    Ok(())
}

fn run_history(conn: &Connection) -> Result<()> {
    let transactions = db::get_all_transactions(conn)?;

    for tx in &transactions {
        let card = if tx.card.is_empty() { "(no card)" } else { tx.card.card_name.as_str() };
        println!(
            "{}  {:<24} ${:>9.2}  {:<32} {:>5.2}%",
            tx.transaction_at.format("%Y-%m-%d %H:%M"),
            tx.merchant.domain_name,
            tx.spend_amount,
            card,
            tx.card.reward.percent_back()
        );
    }

    println!("\n✓ {} transactions", transactions.len());
    Ok(())
}

fn print_selection(selection: &WalletSelection) {
    if selection.is_empty() {
        println!("   No card in the wallet earns rewards here");
        return;
    }

    println!("   Card:     {} ({})", selection.card_name, selection.card_key);
    println!(
        "   Reward:   {}x {} = {:.2}% back",
        selection.reward.amount,
        selection.reward.currency,
        selection.reward.percent_back()
    );
}

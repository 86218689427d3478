//! Copy-Trading Signal Relay
//!
//! Offline tooling around the relay: parse signals, inspect the broadcast
//! audit trail and manage custom pattern rules.

use clap::{Parser, Subcommand};
use copytrade_relay::{
    audit::AuditStore,
    config::Config,
    parser::{Detector, PatternRule, RuleStore, SignalParser},
    storage::Database,
    types::BetSide,
};
use std::io::Read;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "copytrade-relay")]
#[command(about = "Copy-trading signal relay tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a message and print the signal as JSON
    Parse {
        /// Message text, or `-` to read stdin
        text: String,
        /// Also apply the enabled custom rules from the database
        #[arg(long)]
        rules: bool,
    },
    /// Show broadcast delivery metrics
    Metrics {
        /// Window size in hours
        #[arg(long, default_value = "24")]
        hours: u32,
    },
    /// List the most recent broadcasts
    Audit {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Manage custom pattern rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List all rules
    List,
    /// Add a rule
    Add {
        name: String,
        /// Case-insensitive regex; the first capture group becomes the selection
        pattern: String,
        /// Market code, e.g. OVER_UNDER
        market_type: String,
        #[arg(long, default_value = "BACK")]
        side: String,
        #[arg(long)]
        live_only: bool,
        #[arg(long)]
        description: Option<String>,
    },
    Enable { id: i64 },
    Disable { id: i64 },
    Remove { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Parse { text, rules } => parse_text(config, &text, rules).await,
        Commands::Metrics { hours } => show_metrics(config, hours).await,
        Commands::Audit { limit } => show_audit(config, limit).await,
        Commands::Rules { action } => manage_rules(config, action).await,
    }
}

async fn parse_text(config: Config, text: &str, with_rules: bool) -> anyhow::Result<()> {
    let text = if text == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        text.to_string()
    };

    let parser = SignalParser::new();
    if with_rules {
        let db = Database::connect(&config.database.path).await?;
        let count = parser.reload_from(&db).await?;
        tracing::debug!("Parsing with {} custom rules", count);
    }

    match parser.parse(&text) {
        Some(signal) => println!("{}", serde_json::to_string_pretty(&signal)?),
        None => {
            println!("No signal recognised");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn show_metrics(config: Config, hours: u32) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let metrics = db.metrics(hours).await?;

    println!("\n📊 Broadcast Metrics (last {}h)\n", metrics.window_hours);
    println!("Queued:   {}", metrics.queued);
    println!("Sent:     {}", metrics.sent);
    println!("Failed:   {}", metrics.failed);
    println!("Acked:    {}", metrics.acked);
    println!();
    println!("Delivery rate: {:.1}%", metrics.delivery_rate * 100.0);
    println!("ACK rate:      {:.1}%", metrics.ack_rate * 100.0);
    println!("Failure rate:  {:.1}%", metrics.failure_rate * 100.0);

    Ok(())
}

async fn show_audit(config: Config, limit: usize) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let records = db.recent(limit).await?;

    if records.is_empty() {
        println!("No broadcasts recorded");
        return Ok(());
    }

    println!("\n📨 Recent Broadcasts\n");
    for record in &records {
        let first_line = record.payload.lines().next().unwrap_or_default();
        println!(
            "  #{} [{}] chat {} attempts {} - {}",
            record.id, record.status, record.chat_id, record.attempts, first_line
        );
        if let Some(code) = &record.error_code {
            println!(
                "      error {}: {}",
                code,
                record.error_message.as_deref().unwrap_or("-")
            );
        }
        if let Some(seconds) = record.flood_wait_seconds {
            println!("      flood wait {}s", seconds);
        }
    }

    Ok(())
}

async fn manage_rules(config: Config, action: RulesAction) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;

    match action {
        RulesAction::List => {
            let rules = db.list_rules(false).await?;
            if rules.is_empty() {
                println!("No custom rules");
            }
            for rule in &rules {
                println!(
                    "  {} {} [{}] {} {}{} /{}/",
                    rule.id.unwrap_or_default(),
                    if rule.enabled { "✅" } else { "⏸" },
                    rule.name,
                    rule.market_type,
                    rule.bet_side,
                    if rule.live_only { " LIVE" } else { "" },
                    rule.pattern
                );
            }
        }
        RulesAction::Add {
            name,
            pattern,
            market_type,
            side,
            live_only,
            description,
        } => {
            let bet_side = match side.parse::<BetSide>() {
                Ok(side @ (BetSide::Back | BetSide::Lay)) => side,
                _ => anyhow::bail!("invalid side '{}', expected BACK or LAY", side),
            };
            let mut rule = PatternRule::new(&name, &pattern, &market_type);
            rule.bet_side = bet_side;
            rule.live_only = live_only;
            rule.description = description;

            // Reject patterns the parser would skip
            Detector::from_rule(&rule)?;
            let id = db.save_rule(&rule).await?;
            println!("✅ Rule {} saved as #{}", name, id);
            println!("Active rules: {}", db.enabled_rules().await?.len());
        }
        RulesAction::Enable { id } => report_rule_change(db.set_rule_enabled(id, true).await?, id, "enabled"),
        RulesAction::Disable { id } => report_rule_change(db.set_rule_enabled(id, false).await?, id, "disabled"),
        RulesAction::Remove { id } => report_rule_change(db.delete_rule(id).await?, id, "removed"),
    }

    Ok(())
}

fn report_rule_change(changed: bool, id: i64, what: &str) {
    if changed {
        println!("✅ Rule #{} {}", id, what);
    } else {
        println!("No rule #{}", id);
    }
}

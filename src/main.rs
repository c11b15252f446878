mod categorizer;
mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod models;
mod queue;
mod settings;
mod storage;
mod webhooks;
mod worker;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{
    Cli, Commands, ConfigCommands, EventsCommands, ImportsCommands, RulesCommands, TransactionsCommands,
    WebhooksCommands, WorkerCommands,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli::resolve_settings(cli.data_dir.as_deref());

    let result = match cli.command {
        Commands::Init => cli::init::run(&settings),
        Commands::Import {
            file,
            user,
            file_type,
            date_format,
        } => cli::import::run(&settings, &file, &user, file_type.as_deref(), date_format.as_deref()),
        Commands::Imports { command } => match command {
            ImportsCommands::List { user } => cli::imports::list(&settings, user.as_deref()),
            ImportsCommands::Show { id } => cli::imports::show(&settings, id),
            ImportsCommands::Cancel { id } => cli::imports::cancel(&settings, id),
        },
        Commands::Transactions { command } => match command {
            TransactionsCommands::List { user, import } => cli::transactions::list(&settings, &user, import),
        },
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                match_type,
                priority,
            } => cli::rules::add(&settings, &pattern, &category, &match_type, priority),
            RulesCommands::List => cli::rules::list(&settings),
        },
        Commands::Webhooks { command } => match command {
            WebhooksCommands::Add {
                url,
                user,
                events,
                secret,
                retries,
                timeout,
            } => cli::webhooks::add(
                &settings,
                cli::webhooks::AddArgs {
                    url: &url,
                    user: &user,
                    events: &events,
                    secret: secret.as_deref(),
                    retries,
                    timeout,
                },
            ),
            WebhooksCommands::List { user } => cli::webhooks::list(&settings, user.as_deref()),
            WebhooksCommands::Enable { id } => cli::webhooks::set_enabled(&settings, id, true),
            WebhooksCommands::Disable { id } => cli::webhooks::set_enabled(&settings, id, false),
            WebhooksCommands::Remove { id } => cli::webhooks::remove(&settings, id),
            WebhooksCommands::Deliveries { webhook, status } => {
                cli::webhooks::deliveries(&settings, webhook, status.as_deref())
            }
        },
        Commands::Events { command } => match command {
            EventsCommands::Publish {
                event_type,
                user,
                payload,
            } => cli::events::publish(&settings, &event_type, &user, &payload),
        },
        Commands::Worker { command } => match command {
            WorkerCommands::Run => cli::worker::run(&settings),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => cli::config::show(&settings),
            ConfigCommands::Set { pairs } => cli::config::set(&pairs),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

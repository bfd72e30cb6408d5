mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use armoire_client::{Armoire, ClientConfig, Error};
use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        match e.downcast_ref::<Error>() {
            Some(Error::Auth(failure)) => print_error(failure.message()),
            _ => print_error(&format!("{e:#}")),
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = make_client(&cli)?;

    match &cli.command {
        Commands::Login(args) => commands::login(&client, args).await?,
        Commands::Register(args) => commands::register(&client, args).await?,
        Commands::Logout => commands::logout(&client)?,
        Commands::Status => commands::status(&client)?,
        Commands::Whoami => commands::whoami(&client).await?,
        Commands::Stats => commands::stats(&client).await?,
        Commands::Search(args) => commands::search(&client, args).await?,
        Commands::Show(args) => commands::show(&client, args).await?,
        Commands::Upload(args) => commands::upload(&client, args).await?,
        Commands::Update(args) => commands::update(&client, args).await?,
        Commands::Stylist => commands::stylist(&client).await?,
        Commands::Ping => commands::ping(&client).await?,
    }

    Ok(())
}

fn make_client(cli: &Cli) -> Result<Armoire<armoire_client::FileTokenStore>> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config = config.with_api_base_url(url.clone());
    }
    if let Some(path) = &cli.token_path {
        config = config.with_token_path(path);
    }
    Ok(Armoire::from_config(&config)?)
}

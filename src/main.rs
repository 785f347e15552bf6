use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use joinkeeper::backoff::ExponentialDelayerFactory;
use joinkeeper::client::{LoopbackClient, ProtocolClient};
use joinkeeper::config::Config;
use joinkeeper::{ChannelReconciler, JoinRequest};
use tokio_util::sync::CancellationToken;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("joinkeeper")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("joinkeeper.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Channels => handle_channels_command(config),
        Commands::Validate => handle_validate_command(config),
        Commands::Simulate {
            silent,
            join,
            kick_after,
            duration,
            latency_ms,
        } => {
            let options = SimulateOptions {
                silent: silent.clone(),
                join: join.clone(),
                kick_after: kick_after.map(Duration::from_secs),
                duration: Duration::from_secs(*duration),
                latency: Duration::from_millis(*latency_ms),
            };
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(run_simulation(config, options))
        }
    }
}

fn handle_channels_command(config: &Config) -> Result<()> {
    println!("{} {}", "Nick:".green(), config.nick);
    if config.channels.is_empty() {
        println!("{}", "No channels configured".yellow());
    }
    for channel in &config.channels {
        if channel.has_password() {
            println!("  {} {}", channel.name.cyan(), "(keyed)".dimmed());
        } else {
            println!("  {}", channel.name.cyan());
        }
    }
    Ok(())
}

fn handle_validate_command(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    println!("{} {} channels, join wait {}s", "Configuration OK:".green(), config.channels.len(), config.join.wait_secs);
    Ok(())
}

struct SimulateOptions {
    silent: Vec<String>,
    join: Vec<String>,
    kick_after: Option<Duration>,
    duration: Duration,
    latency: Duration,
}

async fn run_simulation(config: &Config, options: SimulateOptions) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    info!("Starting simulation for {:?}", options.duration);

    let mut client = LoopbackClient::new(config.nick.clone()).with_confirm_latency(options.latency);
    for channel in config.channels.iter().filter(|channel| channel.has_password()) {
        client = client.with_channel_key(&channel.name, &channel.password);
    }
    for channel in &options.silent {
        client.set_silent(channel, true);
    }

    let reconciler = ChannelReconciler::new(config, Arc::new(client.clone()), Arc::new(ExponentialDelayerFactory));
    let shutdown = CancellationToken::new();
    reconciler.start(&shutdown).await;
    println!("{} {} channels", "Started:".green(), reconciler.snapshot().len());

    for channel in &options.join {
        match reconciler.join_channel(channel) {
            JoinRequest::AlreadyJoined => println!("  {} already joined", channel.cyan()),
            JoinRequest::Pending(_) => println!("  {} join requested", channel.cyan()),
            JoinRequest::Inactive => println!("  {} {}", channel.cyan(), "reconciler not running".red()),
        }
    }

    if let (Some(delay), Some(first)) = (options.kick_after, config.channels.first()) {
        let kicker = client.clone();
        let channel = first.name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            println!("{} {}", "Kicking from".yellow(), channel);
            kicker.inject_kick(&kicker.local_identity(), &channel);
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("{}", "Interrupted".yellow()),
        _ = tokio::time::sleep(options.duration) => {}
    }

    for status in reconciler.snapshot() {
        let state = if status.joined { "joined".green() } else { "not joined".red() };
        println!(
            "  {} {} (requests: {}, kicks: {})",
            status.name.cyan(),
            state,
            client.join_count(&status.name),
            status.generation
        );
    }

    shutdown.cancel();
    reconciler.stop().await;
    println!("{}", "Stopped".green());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}

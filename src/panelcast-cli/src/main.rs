//! Panelcast CLI - real-time relay for staged panel conversations
//!
//! Serves the `left`, `right` and `audience` delivery channels and the admin
//! surface, or validates configuration and script files.

use clap::{Parser, Subcommand};
use colored::Colorize;
use panelcast_core::{Config, ConversationEvent, Script, Speaker, server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "panelcast=info,panelcast_core=info";

#[derive(Parser)]
#[command(
    name = "panelcast",
    version,
    about = "Real-time relay for staged panel conversations",
    long_about = "Delivers scripted utterances to left, right and audience viewers over WebSockets, one at a time."
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "PANELCAST_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the WebSocket and admin server
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(short, long, env = "PANELCAST_BIND", value_name = "ADDR")]
        bind: Option<String>,

        /// Conversation script to play (overrides the config file)
        #[arg(short, long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// Start the conversation as soon as the server is up
        #[arg(long)]
        autostart: bool,
    },
    /// Validate the configuration and conversation script, then exit
    Check {
        /// Conversation script to validate (defaults to the configured one)
        #[arg(short, long, value_name = "FILE")]
        script: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Serve {
            bind,
            script,
            autostart,
        } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if script.is_some() {
                config.conversation.script_path = script;
            }
            config.validate()?;
            serve(config, autostart).await
        }
        Command::Check { script } => check(&config, script),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn serve(config: Config, autostart: bool) -> Result<(), Box<dyn std::error::Error>> {
    let handle = server::start(&config).await?;
    info!(bind = %config.server.bind, "serving");
    handle
        .conversation()
        .set_callback(Arc::new(create_console_callback()));

    print_rule();
    println!(
        "{}",
        format!("  {} listening on {}", "Panelcast".bold(), handle.local_addr())
            .bright_blue()
            .bold()
    );
    print_rule();
    for channel in ["left", "right", "audience"] {
        println!(
            "  {} ws://{}/ws/{}",
            "▶".bright_cyan(),
            handle.local_addr(),
            channel
        );
    }
    println!();

    if autostart {
        let title = handle.conversation().start().await?;
        info!(%title, "conversation autostarted");
        println!("{} {}", "Playing:".bold(), title.bright_white());
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    println!();
    println!("{}", "  Shutting down...".yellow());
    handle.shutdown().await;

    Ok(())
}

fn check(config: &Config, script: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    println!("{} configuration", "✔".bright_green());

    let Some(path) = script.or_else(|| config.conversation.script_path.clone()) else {
        println!("{}", "No conversation script configured.".dimmed());
        return Ok(());
    };

    let script = Script::load(&path)?;
    info!(path = %path.display(), topics = script.topics.len(), "script validated");
    println!(
        "{} script '{}' ({} topics, {} lines)",
        "✔".bright_green(),
        script.title.bright_white(),
        script.topics.len(),
        script.utterance_count()
    );
    Ok(())
}

fn print_rule() {
    println!("{}", "═".repeat(70).bright_blue());
}

/// Create a callback that prints conversation events to the console.
fn create_console_callback() -> impl Fn(ConversationEvent) + Send + Sync + 'static {
    move |event| match event {
        ConversationEvent::TopicStart { name } => {
            println!();
            println!("{}", "─".repeat(70).bright_magenta());
            println!("{}", format!("  TOPIC: {}", name).bright_magenta().bold());
            println!("{}", "─".repeat(70).bright_magenta());
        }
        ConversationEvent::Utterance { speaker, text } => {
            let label = match speaker {
                Speaker::Host => speaker.display_name().bright_cyan().bold(),
                Speaker::Guest => speaker.display_name().yellow().bold(),
                Speaker::Audience => speaker.display_name().bright_green().bold(),
            };
            println!("{} {}", "▶".bright_cyan(), label);
            for line in textwrap(&text, 66).lines() {
                println!("  {}", line);
            }
        }
        ConversationEvent::AudienceQuestion { question } => {
            println!(
                "{} {}",
                "?".bright_green().bold(),
                format!("Audience asks: {}", question).dimmed()
            );
        }
        ConversationEvent::ConversationEnd { completed } => {
            println!();
            if completed {
                println!("{}", "  Conversation concluded.".bright_green().bold());
            } else {
                println!("{}", "  Conversation stopped.".yellow().bold());
            }
        }
    }
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}

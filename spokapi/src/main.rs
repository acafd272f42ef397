mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;

use spokapi_core::config;
use spokapi_core::service::Service;
use spokapi_core::tracing_ext::init_tracing;

#[derive(Parser)]
#[command(about, version)]
struct Opt {
    /// Path to a configuration file in a YAML format.
    ///
    /// The SPOKAPI_CONFIG environment variable is used if this option is not
    /// specified.
    #[arg(short, long, env = "SPOKAPI_CONFIG")]
    config: PathBuf,

    /// Logging format.
    #[arg(
        long,
        env = "SPOKAPI_LOG_FORMAT",
        value_parser = ["text", "json"],
        default_value = "text",
    )]
    log_format: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Refresh programs periodically until SIGINT or SIGTERM is received.
    ///
    /// This is the default command.
    Serve,

    /// Run a single refresh cycle and print the programs in JSON.
    ///
    /// Every enabled source is fetched when no SOURCE is specified.
    Fetch { sources: Vec<String> },

    /// Play URL of SOURCE on the watch page.
    Watch { source: String, url: String },

    /// Return the watch page to the stop page.
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    init_tracing(&opt.log_format);

    let config = config::load(&opt.config);
    let service = Arc::new(Service::new(config.clone())?);

    match opt.command.unwrap_or(Command::Serve) {
        Command::Serve => serve::main(config, service).await?,
        Command::Fetch { sources } => {
            let source_ids = if sources.is_empty() {
                None
            } else {
                Some(sources)
            };
            service.trigger_refresh(source_ids).await?;
            println!("{}", serde_json::to_string_pretty(&service.snapshot())?);
        }
        Command::Watch { source, url } => {
            let outcome = service.watch(&source, &url).await?;
            tracing::info!(?outcome);
        }
        Command::Stop => service.stop().await?,
    }

    Ok(())
}

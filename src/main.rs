use anyhow::Result;
use lsquota_core::config::{Command, Config, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    match cli.command() {
        Command::Detect => commands::detect(&settings, cli.json).await,
        Command::Quota => commands::quota(&settings, cli.json).await,
        Command::Watch => commands::watch(&settings, cli.json).await,
        Command::WorkspaceId { path, windows } => {
            commands::workspace_id(&path, windows);
            Ok(())
        }
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("lsquota=debug,lsquota_core=debug")
    } else {
        EnvFilter::new("lsquota=info,lsquota_core=info")
    };

    // Results go to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

//! Ewon Processor - sync an Ewon gateway and publish time-aligned state.
//!
//! Run with: `cargo run -p ewon-processor -- run`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ewon_core::{
    AlignmentWindow, DataExchange, DataMailboxClient, Ewon, Frame, HistoryQuery, Tag, TimeBound,
    sort_chronologically,
};
use ewon_processor::{
    CommandChannel, Config, FileCommandChannel, JsonLinesPublisher, MessageType, Processor,
    ProcessorOptions,
};

mod format;

use format::OutputFormat;

/// Ewon Processor - republish Ewon tag history as time-aligned state frames.
#[derive(Parser, Debug)]
#[command(name = "ewon-processor")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "EWON_PROCESSOR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish the UI, then run one uplink (default).
    Run,

    /// Run one uplink cycle.
    Uplink,

    /// Handle a single message by type (DEPLOY, DOWNLINK, UPLINK).
    Handle {
        #[arg(env = "MESSAGE_TYPE")]
        message_type: MessageType,
    },

    /// Show the Data Mailbox account status.
    Status,

    /// List devices visible to the account.
    Devices,

    /// Fetch and show the configured device's current snapshot.
    Device,

    /// Fetch the stored history of one tag.
    History {
        /// Tag id.
        #[arg(short, long)]
        tag: i64,

        /// Lower bound: ISO-8601 timestamp or epoch seconds.
        #[arg(long)]
        from: Option<String>,

        /// Upper bound: ISO-8601 timestamp or epoch seconds.
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of records.
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Sync and show the aligned frames without publishing or storing the
    /// cursor.
    Frames {
        /// Alignment window in seconds (overrides config).
        #[arg(short, long)]
        window: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = Config::load_validated(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!("Loaded configuration: {:?}", config);

    let output = match cli.command.unwrap_or(Command::Run) {
        Command::Run => process(&config, MessageType::Deploy, cli.format).await?,
        Command::Uplink => process(&config, MessageType::Uplink, cli.format).await?,
        Command::Handle { message_type } => process(&config, message_type, cli.format).await?,
        Command::Status => {
            let status = client(&config)?.get_status().await.context("Failed to get status")?;
            format::format_status(&status, cli.format)?
        }
        Command::Devices => {
            let devices = client(&config)?
                .list_devices()
                .await
                .context("Failed to list devices")?;
            format::format_devices(&devices, cli.format)?
        }
        Command::Device => {
            let mut ewon = device(&config)?;
            ewon.refresh().await.context("Failed to fetch device")?;
            format::format_device(&ewon.summary(), ewon.tags(), cli.format)?
        }
        Command::History {
            tag,
            from,
            to,
            limit,
        } => history(&config, tag, from, to, limit, cli.format).await?,
        Command::Frames { window } => frames(&config, window, cli.format).await?,
    };

    print!("{}", output);
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("warn")
                .add_directive("ewon_processor=info".parse()?)
                .add_directive("ewon_core=info".parse()?),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn client(config: &Config) -> Result<DataMailboxClient> {
    let dm = &config.data_mailbox;
    DataMailboxClient::with_base_url(&dm.base_url, dm.credentials(), dm.timeout())
        .context("Failed to create Data Mailbox client")
}

fn device(config: &Config) -> Result<Ewon<DataMailboxClient>> {
    let id = config.ewon_id()?;
    let mut ewon = Ewon::new(client(config)?, id).with_clock_zone(config.ewon.clock_zone());
    if let Some(name) = &config.ewon.name {
        ewon = ewon.with_name(name);
    }
    Ok(ewon)
}

async fn process(config: &Config, message: MessageType, format: OutputFormat) -> Result<String> {
    let options = ProcessorOptions {
        window: config.frames.window()?,
        max_batches: config.sync.max_batches,
    };
    info!(
        "Processing {} for device {} (state: {}, cmds: {})",
        message,
        config.ewon_id()?,
        config.output.state_path.display(),
        config.output.cmds_path.display()
    );

    let mut processor = Processor::new(
        device(config)?,
        JsonLinesPublisher::new(&config.output.state_path),
        FileCommandChannel::new(&config.output.cmds_path),
        config.ui.clone(),
    )
    .with_options(options);

    match processor.handle(message).await? {
        Some(report) => format::format_report(&report, format),
        None => Ok(format!("{} ignored\n", message)),
    }
}

async fn history(
    config: &Config,
    tag: i64,
    from: Option<String>,
    to: Option<String>,
    limit: Option<u32>,
    format: OutputFormat,
) -> Result<String> {
    let mut query = HistoryQuery::new(config.ewon_id()?, tag);
    if let Some(from) = from {
        query = query.from(time_bound(from));
    }
    if let Some(to) = to {
        query = query.to(time_bound(to));
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let payload = client(config)?
        .get_data(&query)
        .await
        .context("Failed to fetch history")?;

    let zone = config.ewon.clock_zone();
    let tags: Vec<Tag> = payload
        .tags
        .iter()
        .map(|t| {
            let (tag, rejected) = Tag::from_payload(t, zone);
            for err in rejected {
                tracing::warn!("Dropping malformed record: {}", err);
            }
            tag
        })
        .collect();
    format::format_history(&tags, format)
}

/// Epoch seconds when the argument is an integer, otherwise ISO-8601.
fn time_bound(raw: String) -> TimeBound {
    match raw.parse::<i64>() {
        Ok(secs) => TimeBound::from(secs),
        Err(_) => TimeBound::from(raw.as_str()),
    }
}

async fn frames(config: &Config, window: Option<u64>, format: OutputFormat) -> Result<String> {
    let window = match window {
        Some(secs) => AlignmentWindow::from_secs(secs)?,
        None => config.frames.window()?,
    };

    let cursor = FileCommandChannel::new(&config.output.cmds_path)
        .read_cursor()
        .await
        .context("Failed to read stored cursor")?;
    let mut ewon = device(config)?.with_cursor(cursor);
    let frames = peek_frames(&mut ewon, window).await?;
    format::format_frames(&ewon.summary(), &frames, format)
}

/// Sync without opening a transaction and return the frames in
/// chronological order. The resulting cursor is discarded by the caller.
async fn peek_frames<C: DataExchange>(
    ewon: &mut Ewon<C>,
    window: AlignmentWindow,
) -> Result<Vec<Frame>> {
    ewon.sync(Some(false)).await.context("Sync failed")?;
    let mut frames = ewon.build_frames(window).to_vec();
    sort_chronologically(&mut frames);
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::parse_from(["ewon-processor"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_history_args() {
        let cli = Cli::parse_from([
            "ewon-processor",
            "history",
            "--tag",
            "7",
            "--from",
            "2024-01-01T00:00:00",
            "--limit",
            "10",
        ]);
        match cli.command {
            Some(Command::History { tag, from, limit, .. }) => {
                assert_eq!(tag, 7);
                assert_eq!(from.as_deref(), Some("2024-01-01T00:00:00"));
                assert_eq!(limit, Some(10));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["ewon-processor", "-v", "-q"]).is_err());
    }

    #[tokio::test]
    async fn test_frames_peek_never_creates_transaction() {
        let mock = ewon_core::MockDataExchange::new();
        let mut ewon = Ewon::new(mock, 81234);

        let frames = peek_frames(&mut ewon, AlignmentWindow::default()).await.unwrap();
        assert!(frames.is_empty());

        let calls = ewon.client().sync_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].last_transaction_id, None);
        assert!(!calls[0].create_transaction);
    }

    #[test]
    fn test_time_bound_parsing() {
        assert_eq!(
            time_bound("0".to_string()).to_iso_string().unwrap(),
            "1970-01-01T00:00:00+00:00"
        );
        assert!(time_bound("yesterday".to_string()).to_iso_string().is_err());
    }
}

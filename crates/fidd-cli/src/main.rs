//! fidd: inspect a directory of fidd packages
//!
//! Commands:
//!   list [--count N] [--before N [--inclusive]]  - message numbers, newest first
//!   show <n>                                      - message metadata as JSON
//!   files <n>                                     - logical files of a message
//!   cat <n> <path> [--offset O] [--length L]      - decrypted file content to stdout
//!   verify <n>                                    - check author signatures
//!   config show                                   - print the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fidd_content::{DirectorySource, FiddContentService, PackageContentService, SignatureStatus};
use fidd_core::config::FiddConfig;
use fidd_core::Serializers;
use fidd_crypto::Engines;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fidd",
    version,
    about = "Read encrypted fidd packages",
    long_about = "fidd: list, read, and verify the messages stored in a fidd package directory"
)]
struct Cli {
    /// Package directory holding <n>.fidd bodies and <n>[.<label>].fiddkey keys
    #[arg(long, short = 'd', env = "FIDD_DIR", default_value = ".")]
    dir: PathBuf,

    /// Path to fidd.toml configuration file
    #[arg(long, short = 'c', env = "FIDD_CONFIG", default_value = "fidd.toml")]
    config: PathBuf,

    /// Log filter (overrides logging.level), e.g. "debug" or "fidd_content=trace"
    #[arg(long, env = "FIDD_LOG")]
    log: Option<String>,

    /// Log output format (overrides logging.format)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List message numbers, newest first
    List {
        /// Maximum number of messages to print
        #[arg(long, short = 'n', default_value_t = 20)]
        count: usize,
        /// Only list messages older than this one
        #[arg(long)]
        before: Option<u64>,
        /// Include the --before message itself
        #[arg(long, requires = "before")]
        inclusive: bool,
    },

    /// Print the metadata of a message
    Show {
        message: u64,
    },

    /// List the logical files of a message
    Files {
        message: u64,
    },

    /// Write a logical file (or a byte range of it) to stdout
    Cat {
        message: u64,
        path: String,
        /// First plaintext byte to read
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Number of bytes to read (default: to the end of the file)
        #[arg(long)]
        length: Option<u64>,
    },

    /// Check the key, metadata, and file signatures of a message
    Verify {
        message: u64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FiddConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, format);

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        return cmd_config_show(&config, &cli.config);
    }

    let service = open_service(&cli.dir, &config)?;
    match cli.command {
        Commands::List {
            count,
            before,
            inclusive,
        } => cmd_list(&service, count, before, inclusive),
        Commands::Show { message } => cmd_show(&service, message),
        Commands::Files { message } => cmd_files(&service, message),
        Commands::Cat {
            message,
            path,
            offset,
            length,
        } => cmd_cat(&service, message, &path, offset, length),
        Commands::Verify { message } => cmd_verify(&service, message),
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries file content for `cat`
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

fn open_service(dir: &Path, config: &FiddConfig) -> Result<PackageContentService<DirectorySource>> {
    let engines = Engines::standard();
    engines
        .check_config(&config.crypto)
        .context("validating [crypto] config")?;
    let source = DirectorySource::open(dir)
        .with_context(|| format!("opening package directory: {}", dir.display()))?;
    let service = PackageContentService::open(
        source,
        Arc::new(engines),
        Serializers::default(),
        config.content.clone(),
    )?;
    tracing::debug!(dir = %dir.display(), messages = service.len(), "package directory ready");
    Ok(service)
}

fn require<T>(value: Option<T>, what: impl FnOnce() -> String) -> Result<T> {
    value.with_context(|| format!("{} not found", what()))
}

// ── `fidd config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &FiddConfig, path: &Path) -> Result<()> {
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "defaults".to_string()
    };
    println!("# fidd configuration ({source})");
    let rendered = toml::to_string_pretty(config).context("rendering config")?;
    print!("{rendered}");
    Ok(())
}

// ── `fidd list` ───────────────────────────────────────────────────────────────

fn cmd_list(
    service: &dyn FiddContentService,
    count: usize,
    before: Option<u64>,
    inclusive: bool,
) -> Result<()> {
    let numbers = match before {
        Some(n) => service.message_numbers_before(n, count, inclusive)?,
        None => service.message_numbers_tail(count)?,
    };
    for n in numbers {
        println!("{n}");
    }
    Ok(())
}

// ── `fidd show` / `fidd files` ────────────────────────────────────────────────

fn cmd_show(service: &dyn FiddContentService, message: u64) -> Result<()> {
    let metadata = require(service.get_fidd_file_metadata(message)?, || {
        format!("message {message}")
    })?;
    println!(
        "{}",
        serde_json::to_string_pretty(&metadata).context("rendering metadata")?
    );
    Ok(())
}

fn cmd_files(service: &dyn FiddContentService, message: u64) -> Result<()> {
    let files = require(service.get_logical_files(message)?, || {
        format!("message {message}")
    })?;
    if files.is_empty() {
        println!("(no logical files)");
        return Ok(());
    }
    println!("{:<10}  {:<24}  {:<18}  PATH", "SIZE", "MIME", "UPDATE");
    for file in files {
        println!(
            "{:<10}  {:<24}  {:<18}  {}",
            file.size,
            file.metadata.mime_type().unwrap_or("-"),
            format!("{:?}", file.metadata.update_type()),
            file.path,
        );
    }
    Ok(())
}

// ── `fidd cat` ────────────────────────────────────────────────────────────────

fn cmd_cat(
    service: &dyn FiddContentService,
    message: u64,
    path: &str,
    offset: u64,
    length: Option<u64>,
) -> Result<()> {
    let data = match (offset, length) {
        (0, None) => service.read_logical_file(message, path)?,
        (offset, Some(length)) => service.read_logical_file_chunk(message, path, offset, length)?,
        (offset, None) => {
            // the listed size is the stored size; whole-file read gives the plaintext length
            let whole = require(service.read_logical_file(message, path)?, || {
                format!("{path} in message {message}")
            })?;
            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            if start > whole.len() {
                anyhow::bail!("offset {offset} is past the end of {path} ({} bytes)", whole.len());
            }
            Some(whole[start..].to_vec())
        }
    };
    let data = require(data, || format!("{path} in message {message}"))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data).context("writing to stdout")?;
    stdout.flush().context("flushing stdout")?;
    Ok(())
}

// ── `fidd verify` ─────────────────────────────────────────────────────────────

fn cmd_verify(service: &dyn FiddContentService, message: u64) -> Result<()> {
    let report = require(service.verify_message(message)?, || {
        format!("message {message}")
    })?;
    println!("message {}", report.message_number);
    println!("  key       {}", report.key);
    println!("  metadata  {}", report.metadata);
    for (path, status) in &report.files {
        println!("  file      {status}  {path}");
    }

    if report.has_invalid() {
        anyhow::bail!("message {message}: signature verification failed");
    }
    if report.is_valid() {
        println!("OK: all signatures valid");
    } else {
        let unsigned = std::iter::once(report.key)
            .chain(std::iter::once(report.metadata))
            .chain(report.files.iter().map(|(_, s)| *s))
            .filter(|s| *s == SignatureStatus::Unsigned)
            .count();
        println!("OK: no invalid signatures ({unsigned} unsigned)");
    }
    Ok(())
}

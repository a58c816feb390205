//! CLI entry point for `lookout`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use lookout::config::Config;
use lookout::error::LookoutError;
use lookout::host::Host;
use lookout::intercept::{InstallOutcome, Interceptor};
use lookout::local::{dir_calendar_capability, LocalHeaderLookup, LocalHost, SummaryLog};
use lookout::model::attachment::Attachment;

#[derive(Parser)]
#[command(
    name = "lookout",
    version,
    about = "Expand TNEF (winmail.dat) attachments into their embedded files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Charset used for part names stored without Unicode (e.g. windows-1252)
    #[arg(long, global = true, value_name = "CHARSET")]
    charset: Option<String>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the parts embedded in a TNEF file
    List {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Save embedded parts into a directory
    Extract {
        path: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Only this part (1-based)
        #[arg(long)]
        part: Option<u32>,
    },
    /// Decode one part for opening, or import it into a calendar directory
    Open {
        path: PathBuf,
        /// Part to open (1-based)
        #[arg(long)]
        part: u32,
        /// Import calendar parts as `<uid>.ics` files into this directory
        #[arg(long, value_name = "DIR")]
        calendar_dir: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = lookout::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let charset = cli.charset;
    match cli.command {
        Commands::List { path, json } => cmd_list(&path, json, charset, &config),
        Commands::Extract { path, output, part } => {
            cmd_extract(&path, &output, part, charset, &config)
        }
        Commands::Open {
            path,
            part,
            calendar_dir,
        } => cmd_open(&path, part, calendar_dir, charset, config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = lookout::config::log_file_path(config);
    let log_dir = lookout::config::cache_dir(config);
    let log_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lookout.log".to_string());
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "lookout", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// A local host with the interceptor installed and the container scanned.
struct Expanded {
    host: Arc<LocalHost>,
    // Hook wrappers only hold a weak reference.
    _interceptor: Arc<Interceptor>,
}

fn expand(
    path: &Path,
    config: &Config,
    output: Option<&Path>,
    calendar: Option<(&Path, Arc<SummaryLog>)>,
    charset: Option<String>,
) -> anyhow::Result<Expanded> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let mut host = LocalHost::open(path, config.performance.read_buffer_size)?;
    if let Some(dir) = output {
        host = host.with_output_dir(dir);
    }
    let host = Arc::new(host);

    let lookup = LocalHeaderLookup::new(host.message_id(), charset);
    let mut interceptor = Interceptor::new(host.clone(), config).with_header_lookup(lookup);
    if let Some((dir, summaries)) = calendar {
        interceptor = interceptor.with_calendar(dir_calendar_capability(dir, summaries));
    }
    let interceptor = Arc::new(interceptor);

    if let InstallOutcome::Incomplete { attempts } = interceptor.install_with_retry(&config.startup)
    {
        return Err(LookoutError::InitializationTimeout { attempts }.into());
    }
    host.finish_loading();

    Ok(Expanded {
        host,
        _interceptor: interceptor,
    })
}

fn progress_bar(len: usize, verb: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} {verb} [{{bar:40.cyan/blue}}] {{pos}}/{{len}}"
            ))
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb
}

/// List the embedded parts.
fn cmd_list(
    path: &Path,
    json: bool,
    charset: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let expanded = expand(path, config, None, None, charset)?;
    let parts = expanded.host.parts();

    if json {
        print_parts_json(path, &parts)?;
    } else {
        print_parts_table(path, &parts);
    }
    Ok(())
}

/// Save embedded parts into `output`.
fn cmd_extract(
    path: &Path,
    output: &Path,
    part: Option<u32>,
    charset: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let expanded = expand(path, config, Some(output), None, charset)?;
    let host = &expanded.host;

    let selected: Vec<Arc<Attachment>> = match part {
        Some(index) => match host.part(index) {
            Some(att) => vec![att],
            None => anyhow::bail!("{} has no part {}", path.display(), index),
        },
        None => host.parts(),
    };

    if selected.is_empty() {
        println!("  No embedded parts found.");
        return Ok(());
    }

    let hooks = host
        .hooks()
        .ok_or(LookoutError::InitializationTimeout { attempts: 0 })?;
    let pb = progress_bar(selected.len(), "Extracting");
    for (i, att) in selected.iter().enumerate() {
        pb.set_position(i as u64);
        if let Some(Err(e)) = hooks.save(att) {
            pb.suspend(|| eprintln!("  {}: {e}", att.display_name));
        }
    }
    pb.finish_and_clear();

    let saved = host.saved();
    println!(
        "  Extracted {} part(s) to {}",
        saved.len(),
        output.display()
    );
    for dest in saved {
        println!("    {}", dest.display());
    }
    Ok(())
}

/// Decode one part for opening, or import it into a calendar directory.
fn cmd_open(
    path: &Path,
    part: u32,
    calendar_dir: Option<PathBuf>,
    charset: Option<String>,
    mut config: Config,
) -> anyhow::Result<()> {
    let summaries = Arc::new(SummaryLog::default());
    if calendar_dir.is_some() {
        config.calendar.direct_to_calendar = true;
    }
    let calendar = calendar_dir
        .as_deref()
        .map(|dir| (dir, Arc::clone(&summaries)));
    let expanded = expand(path, &config, None, calendar, charset)?;
    let host = &expanded.host;

    let Some(att) = host.part(part) else {
        anyhow::bail!("{} has no part {}", path.display(), part);
    };
    let hooks = host
        .hooks()
        .ok_or(LookoutError::InitializationTimeout { attempts: 0 })?;
    if let Some(result) = hooks.open(&att) {
        result?;
    }

    for opened in host.opened() {
        println!("  {} ({})", opened.url, opened.content_type);
    }
    for summary in summaries.summaries() {
        match summary.message() {
            Some(message) => println!("  {message}"),
            None => println!(
                "  Imported {} item(s) from {} into {}",
                summary.imported(),
                summary.source,
                summary.calendar
            ),
        }
    }
    Ok(())
}

/// Print the parts as a human-readable table.
fn print_parts_table(path: &Path, parts: &[Arc<Attachment>]) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {}: {} part(s)", path.display(), parts.len());
    println!();

    if parts.is_empty() {
        return;
    }

    println!(
        "  {:<4} {:<17} {:<40} {:<24} {:>8}",
        "#", "Date", "Name", "Type", "Size"
    );
    println!("  {}", "-".repeat(97));

    for att in parts {
        let date = att
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let name: String = att.display_name.chars().take(39).collect();
        let content_type: String = att.content_type.chars().take(23).collect();
        let size = format_size(att.length.unwrap_or(0), BINARY);

        println!(
            "  {:<4} {:<17} {:<40} {:<24} {:>8}",
            att.part_index, date, name, content_type, size
        );
    }
    println!();
}

/// Print the parts as JSON.
fn print_parts_json(path: &Path, parts: &[Arc<Attachment>]) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = parts
        .iter()
        .map(|att| {
            serde_json::json!({
                "index": att.part_index,
                "name": att.display_name,
                "content_type": att.content_type,
                "size": att.length,
                "date": att.date.map(|d| d.to_rfc3339()),
                "url": att.url,
            })
        })
        .collect();

    let output = serde_json::json!({
        "file": path.to_string_lossy(),
        "part_count": parts.len(),
        "parts": items,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

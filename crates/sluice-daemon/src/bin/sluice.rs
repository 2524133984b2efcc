//! Sluice CLI - Browse a host directory through the file service
//!
//! Usage:
//!   sluice ls <dir> [path]        List a directory
//!   sluice cat <dir> <path>       Stream a file to stdout
//!   sluice stat <dir> <path>      Show attributes
//!   sluice sample-config          Print a default configuration file

use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sluice_core::{Config, VirtualPath};
use sluice_daemon::{mount_uri, FileService};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Streaming virtual filesystem service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run even if the service is disabled in the configuration
    #[arg(long, global = true)]
    enable: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        /// Host directory to mount
        dir: PathBuf,

        /// Path inside the mount
        #[arg(default_value = "/")]
        path: String,
    },

    /// Write a file's content to stdout
    Cat {
        /// Host directory to mount
        dir: PathBuf,

        /// Path inside the mount
        path: String,
    },

    /// Show a file's attributes
    Stat {
        /// Host directory to mount
        dir: PathBuf,

        /// Path inside the mount
        path: String,
    },

    /// Print a sample configuration file
    SampleConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::SampleConfig = cli.command {
        print!("{}", Config::sample());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if !config.service.enabled && !cli.enable {
        info!("File service is disabled ([service] enabled = false), nothing to do");
        return Ok(());
    }

    let service = FileService::new(&config);
    let result = match cli.command {
        Commands::Ls { dir, path } => run_ls(&service, dir, &path),
        Commands::Cat { dir, path } => run_cat(&service, dir, &path),
        Commands::Stat { dir, path } => run_stat(&service, dir, &path),
        Commands::SampleConfig => Ok(()),
    };
    service.shutdown();
    result
}

fn mount(service: &FileService, dir: PathBuf) -> Result<String, Box<dyn std::error::Error>> {
    let dir = dir.canonicalize()?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".into());
    let uri = mount_uri(&name);
    service.mount_local(&uri, &dir)?;
    info!("Mounted {:?} as {}", dir, uri);
    Ok(uri)
}

fn run_ls(service: &FileService, dir: PathBuf, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let uri = mount(service, dir)?;
    let path = VirtualPath::parse(path)?;
    let mut stdout = std::io::stdout().lock();
    for entry in service.list_children(&uri, &path)? {
        let attrs = service.read_attributes(&uri, &entry.path)?;
        let kind = if attrs.is_directory() { 'd' } else { '-' };
        writeln!(
            stdout,
            "{}{} {:>8} {:>10} {} {}",
            kind,
            attrs.permissions,
            attrs.owner,
            attrs.size,
            format_time(attrs.modified),
            entry.entity.name()
        )?;
    }
    Ok(())
}

fn run_cat(service: &FileService, dir: PathBuf, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let uri = mount(service, dir)?;
    let path = VirtualPath::parse(path)?;
    let mut channel = service.open_for_read(&uri, &path)?;
    let mut stdout = std::io::stdout().lock();
    let mut buf = vec![0u8; 64 * 1024];
    while let Some(n) = channel.read(&mut buf)? {
        stdout.write_all(&buf[..n])?;
    }
    stdout.flush()?;
    channel.close()?;
    Ok(())
}

fn run_stat(service: &FileService, dir: PathBuf, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let uri = mount(service, dir)?;
    let path = VirtualPath::parse(path)?;
    let attrs = service.read_attributes(&uri, &path)?;

    println!("  Path: {}", path);
    println!("  Type: {}", if attrs.is_directory() { "directory" } else { "file" });
    println!("  Size: {}", attrs.size);
    println!(" Perms: {} ({:o})", attrs.permissions, attrs.permissions.mode());
    println!(" Owner: {} / {}", attrs.owner, attrs.group);
    println!("Modify: {}", format_time(attrs.modified));
    println!("Access: {}", format_time(attrs.accessed));
    println!("Create: {}", format_time(attrs.created));
    Ok(())
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

//! sshconfig-fs CLI
//!
//! Mounts a read-only filesystem whose single file, `config`, is assembled
//! from the numbered fragments in a `config.d` directory.

use clap::Parser;
use sshconfig_fs::fs::signal::{signal_name, ShutdownListener};
use sshconfig_fs::{spawn_mount, ConfigFs, DetectionMode, MountOptions, WatcherConfig};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sshconfig-fs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve a config file assembled from numbered fragments")]
#[command(long_about = "sshconfig-fs - dynamic ssh config\n\n\
    Mounts a read-only filesystem containing one file, `config`, whose content is\n\
    the concatenation of every file in the chunk directory whose name starts with\n\
    a digit, in byte-wise name order. The file is rebuilt when fragments are added,\n\
    removed or renamed.\n\n\
    Fragments are ordered by name, not by number: `10_work` sorts before `9_home`.\n\
    Use zero-padded prefixes (`01_`, `02_`, ...) to control ordering.\n\n\
    Examples:\n\
      sshconfig-fs\n\
      sshconfig-fs --chunk-dir ~/.ssh/config.d --mountpoint ~/.ssh/.sshconfigfs\n\
      sshconfig-fs --poll-interval-ms 2000 --watch-contents -v")]
pub struct Cli {
    /// Base directory for the default chunk directory and mountpoint
    #[arg(long, value_name = "DIR")]
    pub ssh_dir: Option<PathBuf>,

    /// Directory holding the fragments [default: <ssh-dir>/config.d]
    #[arg(short, long, value_name = "DIR")]
    pub chunk_dir: Option<PathBuf>,

    /// Where to mount the filesystem [default: <ssh-dir>/.sshconfigfs]
    #[arg(short, long, value_name = "DIR")]
    pub mountpoint: Option<PathBuf>,

    /// Milliseconds between change checks
    #[arg(short, long, default_value_t = 500, value_name = "MS")]
    pub poll_interval_ms: u64,

    /// Also detect fragments rewritten in place (one stat per fragment per poll)
    #[arg(long)]
    pub watch_contents: bool,

    /// Allow other users to read the mount
    #[arg(long)]
    pub allow_other: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "sshconfig_fs=debug"
    } else {
        "sshconfig_fs=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn default_ssh_dir() -> io::Result<PathBuf> {
    env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".ssh"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME is not set; pass --ssh-dir"))
}

fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        info!(path = %path.display(), "creating directory");
        fs::create_dir_all(path)?;
    }
    Ok(())
}

fn run(cli: Cli) -> sshconfig_fs::Result<()> {
    let ssh_dir = match cli.ssh_dir {
        Some(dir) => dir,
        None => default_ssh_dir()?,
    };
    let chunk_dir = cli.chunk_dir.unwrap_or_else(|| ssh_dir.join("config.d"));
    let mountpoint = cli.mountpoint.unwrap_or_else(|| ssh_dir.join(".sshconfigfs"));

    ensure_dir(&chunk_dir)?;
    ensure_dir(&mountpoint)?;

    let watcher_config = WatcherConfig {
        poll_interval: Duration::from_millis(cli.poll_interval_ms.max(1)),
        detection: if cli.watch_contents {
            DetectionMode::ChunkContents
        } else {
            DetectionMode::DirectoryMtime
        },
    };

    // Registered before mounting so an early signal is queued, not lost
    let mut shutdown = ShutdownListener::new()?;

    let config_fs = ConfigFs::new(&chunk_dir, watcher_config);
    let options = MountOptions {
        allow_other: cli.allow_other,
        ..MountOptions::default()
    };

    info!(
        chunk_dir = %chunk_dir.display(),
        mountpoint = %mountpoint.display(),
        "mounting"
    );
    let session = spawn_mount(config_fs, &mountpoint, options)?;

    match shutdown.wait() {
        Some(signal) => info!(signal = signal_name(signal), "shutdown requested, unmounting"),
        None => info!("signal queue closed, unmounting"),
    }

    // Unmounts, which runs destroy() and stops the watcher
    drop(session);
    Ok(())
}

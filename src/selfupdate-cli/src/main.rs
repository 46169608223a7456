//! selfupdate - release signing and update tooling.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use selfupdate::{
    CreateReleaseInput, UpdateConfig, UpdateOutcome, Updater, create_release, generate_keypair,
};

const PUBLIC_KEY_FILE: &str = "selfupdate.pub";
const PRIVATE_KEY_FILE: &str = "selfupdate.key";

/// Signed self-update tooling
#[derive(Parser)]
#[command(name = "selfupdate")]
#[command(about = "Sign releases and keep executables up to date")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a password protected signing key pair
    Keygen {
        /// Directory the key files are written to
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Sign artifacts and write a servable release tree
    Release(ReleaseArgs),

    /// Check the release channel for a newer version
    Check(UpdaterArgs),

    /// Install the latest version if it is newer
    Update(UpdaterArgs),

    /// Check and install updates until stopped
    Watch(UpdaterArgs),
}

#[derive(Args)]
struct PasswordArgs {
    /// Private key password
    #[arg(long, env = "SELFUPDATE_PASSWORD", hide_env_values = true)]
    password: String,
}

impl PasswordArgs {
    fn secret(self) -> SecretString {
        SecretString::from(self.password)
    }
}

#[derive(Args)]
struct ReleaseArgs {
    /// Project name, used as the executable name on install
    name: String,

    /// Version being released
    #[arg(value_name = "VERSION")]
    release_version: String,

    /// Artifact archives (`.tar.gz` or `.zip`), one per platform
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Channel to publish to
    #[arg(long, default_value = selfupdate::DEFAULT_CHANNEL)]
    channel: String,

    /// Encrypted private key file
    #[arg(long, default_value = PRIVATE_KEY_FILE)]
    private_key: PathBuf,

    /// Release tree directory
    #[arg(short, long, default_value = "release")]
    out_dir: PathBuf,

    #[command(flatten)]
    password: PasswordArgs,
}

#[derive(Args, Default)]
struct UpdaterArgs {
    /// URL of the release tree
    #[arg(long)]
    base_url: Option<String>,

    /// Base64 encoded public key
    #[arg(long)]
    public_key: Option<String>,

    /// Version currently installed
    #[arg(long)]
    current_version: Option<String>,

    /// Release channel
    #[arg(long)]
    channel: Option<String>,

    /// Executable to replace (defaults to this binary)
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Seconds between checks in watch mode
    #[arg(long)]
    interval_secs: Option<u64>,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Build the updater config: file, then `SELFUPDATE_*` variables, then flags.
fn resolve_config(path: Option<&Path>, args: UpdaterArgs) -> Result<UpdateConfig> {
    let mut config = match path {
        Some(path) => UpdateConfig::load(path)?,
        None => UpdateConfig::default(),
    };
    config.apply_env();

    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(public_key) = args.public_key {
        config.public_key = public_key;
    }
    if let Some(current_version) = args.current_version {
        config.current_version = current_version;
    }
    if let Some(channel) = args.channel {
        config.channel = channel;
    }
    if let Some(executable) = args.executable {
        config.executable_path = Some(executable);
    }
    if let Some(interval) = args.interval_secs {
        config.autoupdate_interval_secs = interval;
    }
    config.verbose = true;

    config.validate()?;
    Ok(config)
}

fn keygen(out_dir: &Path, password: SecretString) -> Result<()> {
    let public_path = out_dir.join(PUBLIC_KEY_FILE);
    let private_path = out_dir.join(PRIVATE_KEY_FILE);
    if private_path.exists() {
        bail!("{} already exists", private_path.display());
    }

    let (public_key, private_key) = generate_keypair(&password)?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    std::fs::write(&private_path, &private_key)
        .with_context(|| format!("failed to write {}", private_path.display()))?;
    std::fs::write(&public_path, public_key.to_base64())
        .with_context(|| format!("failed to write {}", public_path.display()))?;

    info!(
        public_key = %public_path.display(),
        private_key = %private_path.display(),
        "Key pair generated"
    );
    println!("{}", public_key);
    Ok(())
}

fn release(args: ReleaseArgs) -> Result<()> {
    let private_key = std::fs::read_to_string(&args.private_key)
        .with_context(|| format!("failed to read {}", args.private_key.display()))?;

    let release = create_release(CreateReleaseInput {
        name: args.name,
        version: args.release_version,
        channel: args.channel,
        files: args.files,
        private_key: private_key.trim().to_string(),
        password: args.password.secret(),
    })?;
    release.write_to(&args.out_dir)?;

    println!("{}", serde_json::to_string_pretty(&release.channel_manifest)?);
    Ok(())
}

async fn check(config: UpdateConfig) -> Result<()> {
    let updater = Updater::new(config)?;
    let manifest = updater.check_update().await?;

    let report = serde_json::json!({
        "name": manifest.name,
        "channel": manifest.channel,
        "current_version": updater.current_version(),
        "latest_version": manifest.version,
        "update_available": updater.update_available(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn update(config: UpdateConfig) -> Result<()> {
    let updater = Updater::new(config)?;
    let manifest = updater.check_update().await?;

    if !updater.update_available() {
        info!(version = %updater.current_version(), "Already up to date");
        return Ok(());
    }

    match updater.update(&manifest).await? {
        UpdateOutcome::Installed { from, to } => {
            info!(from = %from, to = %to, "Update installed, restart to apply");
        }
        UpdateOutcome::AlreadyInstalled { version } => {
            info!(version = %version, "Already up to date");
        }
    }
    Ok(())
}

async fn watch(config: UpdateConfig) -> Result<()> {
    let updater = Arc::new(Updater::new(config)?);
    let mut installed = updater.subscribe();
    let cancel = CancellationToken::new();
    let handle = updater.spawn_autoupdate(cancel.clone());

    info!(
        channel = %updater.channel(),
        version = %updater.current_version(),
        "Watching for updates"
    );
    info!("Press Ctrl+C to stop");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = installed.recv() => match event {
                Ok(event) => {
                    info!(version = %event.version, "Update installed, restart required");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed update notifications");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    handle.await.context("auto-update task failed")?;

    if updater.restart_required() {
        info!(
            version = %updater.latest_version_installed(),
            "Restart to run the installed version"
        );
    }
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Keygen { out_dir, password } => keygen(&out_dir, password.secret()),
        Command::Release(args) => release(args),
        Command::Check(args) => check(resolve_config(config_path, args)?).await,
        Command::Update(args) => update(resolve_config(config_path, args)?).await,
        Command::Watch(args) => watch(resolve_config(config_path, args)?).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_release_command() {
        let cli = Cli::try_parse_from([
            "selfupdate",
            "release",
            "myapp",
            "1.2.0",
            "dist/myapp_linux_amd64.tar.gz",
            "dist/myapp_windows_amd64.zip",
            "--channel",
            "beta",
            "--password",
            "secret",
        ])
        .unwrap();

        match cli.command {
            Command::Release(args) => {
                assert_eq!(args.name, "myapp");
                assert_eq!(args.release_version, "1.2.0");
                assert_eq!(args.files.len(), 2);
                assert_eq!(args.channel, "beta");
                assert_eq!(args.private_key, PathBuf::from(PRIVATE_KEY_FILE));
            }
            _ => panic!("expected release command"),
        }
    }

    #[test]
    fn test_release_requires_files() {
        let result = Cli::try_parse_from(["selfupdate", "release", "myapp", "1.2.0", "--password", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["selfupdate", "check", "--json-logs", "--log-level", "debug"])
            .unwrap();
        assert!(cli.json_logs);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_resolve_config_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
base_url = "https://downloads.example.com/myapp"
public_key = "from-file"
current_version = "1.0.0"
"#
        )
        .unwrap();

        let args = UpdaterArgs {
            current_version: Some("1.1.0".to_string()),
            channel: Some("beta".to_string()),
            ..UpdaterArgs::default()
        };
        let config = resolve_config(Some(file.path()), args).unwrap();

        assert_eq!(config.base_url, "https://downloads.example.com/myapp");
        assert_eq!(config.current_version, "1.1.0");
        assert_eq!(config.channel, "beta");
        assert!(config.verbose);
    }

    #[test]
    fn test_resolve_config_requires_base_url() {
        let args = UpdaterArgs {
            base_url: Some(String::new()),
            public_key: Some("key".to_string()),
            current_version: Some("1.0.0".to_string()),
            ..UpdaterArgs::default()
        };
        assert!(resolve_config(None, args).is_err());
    }

    #[test]
    fn test_keygen_writes_key_files() {
        let dir = tempfile::tempdir().unwrap();
        keygen(dir.path(), SecretString::from("pw".to_string())).unwrap();

        let public = std::fs::read_to_string(dir.path().join(PUBLIC_KEY_FILE)).unwrap();
        assert!(selfupdate::PublicKey::from_base64(&public).is_ok());
        assert!(dir.path().join(PRIVATE_KEY_FILE).exists());

        // Refuses to overwrite an existing key.
        assert!(keygen(dir.path(), SecretString::from("pw".to_string())).is_err());
    }
}

//! vpk: build manifests, sync directories and manage `.vpk` packages.
//!
//! # Usage
//!
//! ```bash
//! # Publish a manifest next to the files
//! vpk manifest ./release --output ./release/manifest.json
//!
//! # Bring a local copy up to date
//! vpk sync ./game https://cdn.example.com/game
//!
//! # Package and inspect
//! VPK_PASSWORD=secret vpk pack ./assets -o assets.vpk
//! vpk info assets.vpk
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use vpk_format::{
    build, derive_key, diff, payload, update, BuildOptions, CompressionMode, Config,
    EncryptionMode, KdfParams, PackageArchive, PackageBuilder, VcfContainer,
};
use vpk_sync::{load_manifest, FetchOptions, SyncJob, DEFAULT_MANIFEST_NAME};

const DEFAULT_SALT: &str = "vpk-default-salt";

/// Manifest-based file sync and encrypted packages.
#[derive(Parser, Debug)]
#[command(name = "vpk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (.toml, .json or .vcf)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Password used to derive package keys
    #[arg(long, global = true, env = "VPK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fingerprint a directory
    Manifest {
        dir: PathBuf,
        /// Record size and modification time
        #[arg(long)]
        full: bool,
        #[arg(long)]
        strip_prefix: Option<String>,
        #[arg(long)]
        replace_prefix: Option<String>,
        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List paths that differ between two manifests (paths or URLs)
    Diff { local: String, remote: String },
    /// Update a directory from a remote base URL or mirror directory
    Sync {
        dir: PathBuf,
        remote_base: String,
        #[arg(long)]
        full: bool,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        manifest_name: Option<String>,
    },
    /// Package a directory
    Pack {
        dir: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        compression: Option<String>,
        #[arg(long)]
        encryption: Option<String>,
    },
    /// Extract a package
    Unpack { vpk: PathBuf, dest: PathBuf },
    /// Show a package header
    Info { vpk: PathBuf },
    /// Replace package entries with the files of a directory
    Update {
        vpk: PathBuf,
        dir: PathBuf,
        /// Entry to drop from the package (repeatable)
        #[arg(long = "remove", value_name = "PATH")]
        remove: Vec<String>,
    },
    /// Encrypt a configuration file into a .vcf container
    SealConfig { input: PathBuf, output: PathBuf },
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(args) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let password = args.password.map(SecretString::new);
    let config = match &args.config {
        Some(path) => {
            let key = match (&password, is_sealed(path)) {
                (Some(password), true) => Some(config_key(password)?),
                _ => None,
            };
            Config::load(path, key.as_deref())
                .with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => Config::default(),
    };

    match args.command {
        Command::Manifest {
            dir,
            full,
            strip_prefix,
            replace_prefix,
            output,
        } => {
            let mut options = BuildOptions::new(&dir)
                .with_full(full || config.get_boolean("sync", "full", false)?);
            if let Some(prefix) = strip_prefix {
                options = options.with_strip_prefix(prefix);
            }
            if let Some(prefix) = replace_prefix {
                options = options.with_replace_prefix(prefix);
            }
            if let Some(out) = output.as_ref().and_then(|out| out.strip_prefix(&dir).ok()) {
                options = options.with_exclude(out.to_string_lossy().to_string());
            }

            let result = build(&options)?;
            for skipped in &result.skipped_dirs {
                warn!("Skipped {}", skipped.display());
            }
            match output {
                Some(out) => result.manifest.save(&out)?,
                None => println!("{}", String::from_utf8_lossy(&result.manifest.to_json()?)),
            }
        }
        Command::Diff { local, remote } => {
            let options = fetch_options(&config, None, None)?;
            let local = load_manifest(&local, &options)?;
            let remote = load_manifest(&remote, &options)?;
            for path in diff(&local, &remote) {
                println!("{}", path);
            }
        }
        Command::Sync {
            dir,
            remote_base,
            full,
            workers,
            timeout_secs,
            manifest_name,
        } => {
            let manifest_name = manifest_name.unwrap_or_else(|| {
                config.get_string("sync", "manifest_name", DEFAULT_MANIFEST_NAME)
            });
            let full = full || config.get_boolean("sync", "full", false)?;
            let job = SyncJob::new(&dir, remote_base)
                .with_manifest_name(manifest_name)
                .with_build(BuildOptions::new(&dir).with_full(full))
                .with_fetch(fetch_options(&config, workers, timeout_secs)?);

            let outcome = job.run()?;
            info!(
                "Updated {} of {} files",
                outcome.report.succeeded.len(),
                outcome.update_set.len()
            );
            for (path, err) in &outcome.report.failed {
                warn!("{}: {}", path, err);
            }
            if !outcome.report.is_complete() {
                bail!("{} files failed to sync", outcome.report.failed.len());
            }
        }
        Command::Pack {
            dir,
            output,
            compression,
            encryption,
        } => {
            let key = package_key(&config, password.as_ref())?;
            let compression: CompressionMode = compression
                .unwrap_or_else(|| config.get_string("package", "compression", "zstd"))
                .parse()?;
            let encryption: EncryptionMode = encryption
                .unwrap_or_else(|| config.get_string("package", "encryption", "AES-GCM"))
                .parse()?;

            let builder = PackageBuilder::new()
                .with_dir(&dir)?
                .with_author(config.get_string("package", "author", ""))
                .with_copyright(config.get_string("package", "copyright", ""))
                .with_info(config.get_string("package", "info", ""))
                .with_compression(compression)
                .with_encryption(encryption);
            let output = output.unwrap_or_else(|| default_output(&dir, builder.name()));
            builder.write_to(&output, key.expose_secret())?;
            info!("Wrote {}", output.display());
        }
        Command::Unpack { vpk, dest } => {
            let key = package_key(&config, password.as_ref())?;
            let written = PackageArchive::open(&vpk)?.extract(key.expose_secret(), &dest)?;
            info!("Extracted {} files to {}", written.len(), dest.display());
        }
        Command::Info { vpk } => {
            let archive = PackageArchive::open(&vpk)?;
            for (field, value) in archive.header().to_fields() {
                println!("{:<12} {}", field, value);
            }
        }
        Command::Update { vpk, dir, remove } => {
            let key = package_key(&config, password.as_ref())?;
            let archive = PackageArchive::open(&vpk)?;
            let existing = archive.payload(key.expose_secret())?;
            let entries = payload::collect(&dir)?;
            let removals: BTreeSet<String> = remove.into_iter().collect();
            update(&existing, &entries, &removals, key.expose_secret(), &vpk)?;
            info!(
                "Updated {}: {} entries written, {} removals",
                vpk.display(),
                entries.len(),
                removals.len()
            );
        }
        Command::SealConfig { input, output } => {
            let password = password
                .as_ref()
                .context("a password is required to seal a config")?;
            let blob = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            VcfContainer::seal(&config_key(password)?, &blob)?.save(&output)?;
            info!("Sealed {} into {}", input.display(), output.display());
        }
    }

    Ok(())
}

fn is_sealed(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("vcf")
}

/// `<name>.vpk` next to `dir`, or in the working directory when `dir` has no
/// final component (e.g. `.`).
fn default_output(dir: &Path, name: &str) -> PathBuf {
    let file = format!("{}.vpk", name);
    match dir.file_name() {
        Some(_) => dir.with_file_name(file),
        None => PathBuf::from(file),
    }
}

fn fetch_options(
    config: &Config,
    workers: Option<usize>,
    timeout_secs: Option<u64>,
) -> Result<FetchOptions> {
    let defaults = FetchOptions::default();
    let workers = match workers {
        Some(workers) => workers,
        None => usize::try_from(config.get_int("sync", "workers", defaults.workers as i64)?)
            .context("[sync] workers must not be negative")?,
    };
    let timeout = match timeout_secs {
        Some(secs) => Duration::from_secs(secs),
        None => {
            let secs =
                config.get_int("sync", "timeout_secs", defaults.timeout.as_secs() as i64)?;
            let secs = u64::try_from(secs).context("[sync] timeout_secs must not be negative")?;
            Duration::from_secs(secs)
        }
    };
    Ok(defaults.with_workers(workers).with_timeout(timeout))
}

fn kdf_params(config: &Config) -> Result<KdfParams> {
    let defaults = KdfParams::default();
    let get = |key: &str, default: i64| -> Result<i64> { Ok(config.get_int("kdf", key, default)?) };
    Ok(KdfParams {
        key_length: usize::try_from(get("key_length", defaults.key_length as i64)?)?,
        time_cost: u32::try_from(get("time_cost", defaults.time_cost as i64)?)?,
        memory_cost: u32::try_from(get("memory_cost", defaults.memory_cost as i64)?)?,
        parallelism: u32::try_from(get("parallelism", defaults.parallelism as i64)?)?,
    })
}

fn package_key(config: &Config, password: Option<&SecretString>) -> Result<secrecy::SecretVec<u8>> {
    let Some(password) = password else {
        bail!("a password is required (use --password or VPK_PASSWORD)");
    };
    let salt = config.get_string("kdf", "salt", DEFAULT_SALT);
    let key = derive_key(
        password.expose_secret().as_bytes(),
        salt.as_bytes(),
        &kdf_params(config)?,
    )?;
    Ok(secrecy::SecretVec::new(key))
}

/// Key for `.vcf` files, derived with default parameters so a sealed config
/// can be opened before any `[kdf]` section is known.
fn config_key(password: &SecretString) -> Result<Vec<u8>> {
    Ok(derive_key(
        password.expose_secret().as_bytes(),
        DEFAULT_SALT.as_bytes(),
        &KdfParams::default(),
    )?)
}

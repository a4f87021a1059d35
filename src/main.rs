//! Seam command-line interface
//!
//! A fast package manager for the Ruby gem ecosystem: resolve a Gemfile,
//! write the lock file, install gems into the cache, and run their
//! binaries with a composed load path.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seam::gemfile::Gemfile;
use seam::lockfile::Lockfile;
use seam::resolver::{ResolvedGem, Resolver};
use seam::version::{ConstraintSet, Version};
use seam::{CompactIndex, HttpClient, Installer, environment, paths};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "seam")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A fast Ruby gem package manager", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the Gemfile and write the lock file
    Lock {
        /// Path to the Gemfile (default: gems.rb or Gemfile)
        #[arg(long)]
        gemfile: Option<String>,

        /// Print the lock text to stdout instead of writing the file
        #[arg(long)]
        print: bool,
    },

    /// Resolve, download, and unpack gems into the environment cache
    Install {
        /// Path to the Gemfile (default: gems.rb or Gemfile)
        #[arg(long)]
        gemfile: Option<String>,

        /// Number of concurrent downloads
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        /// Suppress progress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Run a gem binary with the environment's load path
    Exec {
        /// Binary name, as declared by the gem
        binary: String,

        /// Arguments passed through to the binary
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Path to the Gemfile (default: gems.rb or Gemfile)
        #[arg(long)]
        gemfile: Option<String>,

        /// Number of concurrent downloads
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
    },

    /// Inspect or clean the artifact and environment caches
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache size and file counts
    Stats,
    /// Remove all cached artifacts and environments
    Clean,
}

fn main() {
    let cli = Cli::parse();
    seam::init_debug(cli.debug);

    if let Err(error) = run(cli.command) {
        display_error(&error);
        process::exit(1);
    }
}

/// Display an error and its cause chain
fn display_error(error: &anyhow::Error) {
    eprintln!("error: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = cause.source();
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Lock { gemfile, print } => cmd_lock(gemfile.as_deref(), print),
        Commands::Install {
            gemfile,
            jobs,
            quiet,
        } => cmd_install(gemfile.as_deref(), jobs, quiet).map(|_| ()),
        Commands::Exec {
            binary,
            args,
            gemfile,
            jobs,
        } => cmd_exec(gemfile.as_deref(), &binary, &args, jobs),
        Commands::Cache { command } => cmd_cache(&command),
    }
}

/// Load and statically evaluate the Gemfile
fn load_gemfile(explicit: Option<&str>) -> Result<(PathBuf, Gemfile)> {
    let path = explicit.map_or_else(paths::find_gemfile, PathBuf::from);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let runtime = environment::find_runtime().ok();
    let constants = environment::env_constants(runtime.as_deref());
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let gemfile = Gemfile::parse_with_env(&content, constants, base_dir)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok((path, gemfile))
}

/// The source to resolve against: env override first, then the Gemfile
fn source_for(gemfile: &Gemfile) -> String {
    seam::env_vars::gem_source().unwrap_or_else(|| gemfile.source.clone())
}

/// Resolve a Gemfile's declarations against the compact index.
///
/// Returns the resolution together with the index client so callers can
/// reuse its cache (checksums, later lookups).
fn resolve_gemfile(gemfile: &Gemfile, source: &str) -> Result<(Vec<ResolvedGem>, CompactIndex)> {
    let client = HttpClient::new().context("failed to build HTTP client")?;
    let ruby_version = gemfile
        .ruby_version
        .as_deref()
        .and_then(|version| Version::parse(version).ok());
    let index = CompactIndex::new(client, source).with_ruby_version(ruby_version);

    let mut roots = Vec::with_capacity(gemfile.gems.len());
    for declaration in &gemfile.gems {
        let constraints = ConstraintSet::parse(&declaration.requirement()).with_context(|| {
            format!(
                "invalid constraint {:?} for gem {}",
                declaration.requirement(),
                declaration.name
            )
        })?;
        roots.push((declaration.name.clone(), constraints));
    }

    let mut resolver = Resolver::new(index);
    let resolution = resolver.resolve(&roots)?;
    Ok((resolution, resolver.into_provider()))
}

fn cmd_lock(gemfile_path: Option<&str>, print: bool) -> Result<()> {
    let (path, gemfile) = load_gemfile(gemfile_path)?;
    let source = source_for(&gemfile);
    let (resolution, _index) = resolve_gemfile(&gemfile, &source)?;

    let lockfile = Lockfile::from_resolution(&source, &resolution, &gemfile.gems);
    if print {
        print!("{lockfile}");
        return Ok(());
    }

    let lock_path = paths::lockfile_for_gemfile(&path);
    std::fs::write(&lock_path, lockfile.to_string())
        .with_context(|| format!("failed to write {}", lock_path.display()))?;
    println!("wrote {}", lock_path.display());
    Ok(())
}

/// Resolve (or reuse the lock file), then download and unpack. Returns the
/// environment directory.
fn cmd_install(gemfile_path: Option<&str>, jobs: Option<usize>, quiet: bool) -> Result<PathBuf> {
    let (path, gemfile) = load_gemfile(gemfile_path)?;
    let source = source_for(&gemfile);
    let lock_path = paths::lockfile_for_gemfile(&path);

    // A lock file pins the versions; otherwise resolve and write one
    let (gems, mut index) = if lock_path.is_file() {
        let lockfile = Lockfile::parse_file(&lock_path)?;
        let mut gems = Vec::with_capacity(lockfile.gems.len());
        for locked in &lockfile.gems {
            let version = Version::parse(&locked.version).with_context(|| {
                format!("invalid version {:?} in {}", locked.version, lock_path.display())
            })?;
            gems.push((locked.name.clone(), version));
        }

        let client = HttpClient::new().context("failed to build HTTP client")?;
        (gems, CompactIndex::new(client, source.as_str()))
    } else {
        let (resolution, index) = resolve_gemfile(&gemfile, &source)?;
        let lockfile = Lockfile::from_resolution(&source, &resolution, &gemfile.gems);
        std::fs::write(&lock_path, lockfile.to_string())
            .with_context(|| format!("failed to write {}", lock_path.display()))?;

        let gems = resolution
            .into_iter()
            .map(|gem| (gem.name, gem.version))
            .collect();
        (gems, index)
    };

    let env_dir = environment_dir(&gemfile, &gems)?;
    let jobs = jobs
        .or_else(seam::env_vars::jobs)
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, usize::from).min(8));

    let client = HttpClient::new().context("failed to build HTTP client")?;
    let mut installer = Installer::new(&mut index, client, source, jobs, quiet);
    let report = installer.install(&gems, &env_dir)?;

    if !quiet {
        if report.installed == 0 {
            println!("environment up to date ({} gems)", gems.len());
        } else {
            println!(
                "installed {} gems to {}",
                report.installed,
                env_dir.display()
            );
        }
    }
    Ok(env_dir)
}

fn cmd_exec(
    gemfile_path: Option<&str>,
    binary: &str,
    args: &[String],
    jobs: Option<usize>,
) -> Result<()> {
    let env_dir = cmd_install(gemfile_path, jobs, true)?;
    let runtime = environment::find_runtime()?;

    // Replaces the process on success
    match environment::exec_binary(&runtime, &env_dir, binary, args)? {}
}

/// The per-command environment directory: keyed by the runtime API version
/// and the first declared gem at its locked version.
fn environment_dir(gemfile: &Gemfile, gems: &[(String, Version)]) -> Result<PathBuf> {
    let runtime_api = environment::find_runtime()
        .ok()
        .as_deref()
        .and_then(environment::runtime_version)
        .unwrap_or_else(|| "unknown".to_string());

    let primary = gemfile
        .gems
        .first()
        .and_then(|declaration| {
            gems.iter()
                .find(|(name, _)| *name == declaration.name)
                .map(|(name, version)| format!("{name}-{version}"))
        })
        .unwrap_or_else(|| "default".to_string());

    let env_dir = paths::env_cache_dir(&runtime_api, &primary);
    std::fs::create_dir_all(&env_dir)
        .with_context(|| format!("failed to create {}", env_dir.display()))?;
    Ok(env_dir)
}

fn cmd_cache(command: &CacheCommands) -> Result<()> {
    let root = paths::cache_root();
    match command {
        CacheCommands::Stats => {
            let stats = seam::collect_stats(&root)
                .with_context(|| format!("failed to scan {}", root.display()))?;
            println!("{}", root.display());
            println!(
                "  {} files, {}",
                stats.files,
                seam::human_bytes(stats.total_size)
            );
        }
        CacheCommands::Clean => {
            seam::cache::clean(&root)
                .with_context(|| format!("failed to clean {}", root.display()))?;
            println!("cleaned {}", root.display());
        }
    }
    Ok(())
}

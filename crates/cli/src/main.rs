//! Unix user mapping command-line tool.
//!
//! Provides subcommands for checking a mapping file, resolving the
//! connections a user and its groups are entitled to, and generating a
//! sample mapping.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use usermap_core::config::AppConfig;
use usermap_core::mapping::MappingCache;
use usermap_core::models::ConfigurationEntry;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Unix user mapping command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "usermap",
    version,
    about = "Inspect and test a Unix user to connection mapping"
)]
struct Cli {
    /// Path to the TOML settings file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Mapping file to use instead of the one derived from the settings.
    #[arg(short, long, global = true)]
    mapping: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `usermap_core=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse the mapping file and report problems.
    Check,

    /// Show the connections a user is entitled to.
    Resolve {
        /// Unix user name.
        user: String,

        /// Group the user belongs to. May be repeated.
        #[arg(short, long = "group")]
        groups: Vec<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the service name used for identity verification.
    Service,

    /// Write a sample mapping file.
    Init {
        /// Output path for the generated mapping file.
        #[arg(short, long, default_value = "./unix-user-mapping.xml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref(), cli.config.is_some().then_some(&config));

    let open_cache = || {
        let path = cli.mapping.clone().unwrap_or_else(|| config.mapping_path());
        debug!(path = %path.display(), "using mapping file");
        MappingCache::new(path)
    };

    match &cli.command {
        Commands::Check => cmd_check(&open_cache()),
        Commands::Resolve { user, groups, json } => {
            cmd_resolve(&open_cache(), user, groups, *json)
        }
        Commands::Service => cmd_service(&open_cache()),
        Commands::Init { output } => cmd_init(output),
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            AppConfig::load_and_validate(path).context("failed to load configuration file")
        }
        None => Ok(AppConfig::default()),
    }
}

/// The flag wins, then the settings file. Without either the tool stays
/// quiet below warnings. A subscriber installed earlier is left in place.
fn init_logging(flag: Option<&str>, config: Option<&AppConfig>) {
    let level = flag
        .or_else(|| config.map(|c| c.logging.level.as_str()))
        .unwrap_or("warn");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_check(cache: &MappingCache) -> Result<()> {
    println!("Checking mapping: {}", cache.path().display());
    println!();

    let document = cache
        .refresh()
        .context("user mapping could not be loaded")?;
    println!("  [OK] Mapping structure is valid");

    let summary = document.summary();
    println!();
    println!("Mapping summary:");
    println!("  Service name  : {}", document.service_name());
    println!("  Configurations: {}", summary.configs);
    println!("  Users         : {}", summary.users);
    println!("  Groups        : {}", summary.groups);
    if let Some(snapshot) = cache.snapshot() {
        let modified = chrono::DateTime::<chrono::Local>::from(snapshot.modified);
        println!("  Last modified : {}", modified.format("%Y-%m-%d %H:%M:%S %Z"));
    }

    let unresolved = document.unresolved_references();
    println!();
    if unresolved.is_empty() {
        println!("All config references resolve.");
    } else {
        println!("Unresolved references ({}):", unresolved.len());
        for reference in &unresolved {
            println!("  [WARN] {}", reference);
        }
    }

    Ok(())
}

fn cmd_resolve(cache: &MappingCache, user: &str, groups: &[String], json: bool) -> Result<()> {
    let document = cache
        .refresh()
        .context("user mapping could not be loaded")?;
    let configs = document.resolve(user, groups);

    if json {
        let rendered =
            serde_json::to_string_pretty(&configs).context("failed to serialize configurations")?;
        println!("{}", rendered);
        return Ok(());
    }

    if configs.is_empty() {
        println!("No configurations for user '{}'.", user);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "Protocol", "Parameters"]);

    for (name, entry) in &configs {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(entry.protocol()),
            Cell::new(render_parameters(entry)),
        ]);
    }

    println!("{}", table);
    Ok(())
}

fn cmd_service(cache: &MappingCache) -> Result<()> {
    let document = cache
        .refresh()
        .context("user mapping could not be loaded")?;
    println!("{}", document.service_name());
    Ok(())
}

const SAMPLE_MAPPING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- Unix user mapping. Users and groups are granted connections by name. -->
<unix-user-mapping serviceName="guacamole">

    <config name="desktop" protocol="rdp">
        <param name="hostname" value="desktop.example.com"/>
        <param name="port" value="3389"/>
    </config>

    <config name="shell" protocol="ssh">
        <param name="hostname" value="shell.example.com"/>
        <param name="port" value="22"/>
    </config>

    <user name="alice">
        <config-ref name="desktop"/>
    </user>

    <group name="developers">
        <config-ref name="shell"/>
    </group>

</unix-user-mapping>
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, SAMPLE_MAPPING).context("failed to write mapping file")?;

    println!("Sample mapping written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the configs, users and groups for your hosts");
    println!("  2. Check it with: usermap --mapping {} check", output.display());

    Ok(())
}

/// One `name=value` per line, sorted by name.
fn render_parameters(entry: &ConfigurationEntry) -> String {
    let mut params: Vec<_> = entry.parameters().iter().collect();
    params.sort();
    params
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

mod cli;

use heicsync::{
    config,
    conversion::{ConversionOutcome, Converter, ConverterSettings, HeifEncTool, PathResolver, TargetEncoder},
    service, tools,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over config and environment
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    service::start(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "heicsync=trace,heicsync_db=debug,heicsync_common=debug,tower_http=debug".to_string()
        } else {
            "heicsync=info,heicsync_db=info,tower_http=info".to_string()
        }
    });

    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => service::run_to_completion(
            start_server(host, port, cli.config.as_deref()),
            service::EXIT_GRACE,
        ),
        Commands::Convert { file, output, json } => {
            convert_file(&file, output, json, cli.config.as_deref())
        }
        Commands::Scan { dirs } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(scan_dirs(dirs, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("heicsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn convert_file(
    file: &Path,
    output: Option<PathBuf>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !file.is_file() {
        anyhow::bail!("Input file does not exist: {:?}", file);
    }

    let encoder: Arc<dyn TargetEncoder> = Arc::new(HeifEncTool::new(&config.tools));
    let target = match output {
        Some(path) => path,
        None => PathResolver::new(
            config.conversion.output_dir_name.clone(),
            encoder.extension(),
        )
        .resolve(file)?,
    };

    let converter = Converter::new(ConverterSettings::from(&config.conversion), encoder);
    let outcome = converter.convert(file, &target);

    if json {
        let report = serde_json::json!({
            "source": file,
            "target": target,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_outcome(file, &target, &outcome);
    }

    if !outcome.success {
        anyhow::bail!(
            "Conversion failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_outcome(source: &Path, target: &Path, outcome: &ConversionOutcome) {
    println!("Source: {}", source.display());
    println!("Target: {}", target.display());
    if outcome.success {
        println!("✓ Converted");
    } else {
        println!("✗ Failed: {}", outcome.error.as_deref().unwrap_or("unknown error"));
        return;
    }
    println!(
        "Metadata preserved: {}",
        if outcome.metadata_preserved { "yes" } else { "no" }
    );
    if let Some(ref ts) = outcome.source_timestamp {
        println!("  Source timestamp: {}", ts);
    }
    if let Some(ref ts) = outcome.target_timestamp {
        println!("  Target timestamp: {}", ts);
    }
    if !outcome.metadata_summary.is_empty() {
        println!("  Summary: {}", outcome.metadata_summary);
    }
}

async fn scan_dirs(dirs: Vec<PathBuf>, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let dirs = if dirs.is_empty() {
        config.watch.dirs.clone()
    } else {
        dirs
    };
    if dirs.is_empty() {
        anyhow::bail!("No directories to scan: pass them as arguments or set watch.dirs");
    }

    let stats = service::scan_once(config, dirs).await?;

    println!("Total jobs: {}", stats.total);
    println!("  Succeeded: {}", stats.succeeded);
    println!("  Failed: {}", stats.failed);
    println!(
        "  Metadata preserved: {} ({:.2}%)",
        stats.metadata_preserved, stats.metadata_preservation_rate
    );
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let tools = tools::check_tools(&config.tools);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Conversions will fail until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_summary(&config::Config::default());
        }
    }

    Ok(())
}

fn print_summary(config: &config::Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Ledger: {}", config.server.db_path.display());
    println!("  Mode: {:?}", config.watch.mode);
    println!("  Watch dirs: {}", config.watch.dirs.len());
    println!(
        "  Quality: {}, workers: {}, preserve metadata: {}",
        config.conversion.quality, config.conversion.max_workers, config.conversion.preserve_metadata
    );
}

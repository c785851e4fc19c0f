//! hexscan: file scanner with encrypted quarantine.
//!
//! This is the main entry point for the CLI application.

use hexscan::core::config::{Config, ScanOptions};
use hexscan::core::error::Result;
use hexscan::detection::{RuleEngine, SignatureIndex};
use hexscan::quarantine::{QuarantineEntry, QuarantineStore};
use hexscan::scanner::{ConsoleProgressReporter, FileOutcome, ScanReport, ScanTarget, Scanner};
use hexscan::ui::cli::{
    Cli, Commands, ConfigAction, OutputFormat, QuarantineAction, RulesAction, ScanArgs,
    SignatureAction,
};
use hexscan::utils::logging::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse_args();

    let (config, config_path) = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            config.validate()?;
            (config, path.clone())
        }
        None => (Config::load_or_default(), Config::default_config_path()),
    };

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::from_config(&config)
    };
    init_logging(log_config)?;

    log::debug!("hexscan v{}", env!("CARGO_PKG_VERSION"));
    let config = Arc::new(config);

    match cli.command {
        Some(Commands::Scan(args)) => run_scan(config, args, cli.format).await,
        Some(Commands::Quarantine { action }) => {
            run_quarantine(&config, action, cli.format).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Signatures { action }) => {
            run_signatures(&config, &config_path, action, cli.format).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Rules { action }) => {
            run_rules(&config, action, cli.format).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Config { action }) => {
            run_config(&config, &config_path, action).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Info) => run_info(&config, &config_path).map(|_| ExitCode::SUCCESS),
        None => {
            println!("hexscan - file scanner with encrypted quarantine");
            println!();
            println!("Use --help for usage information");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run a scan job. Exits 1 when anything was flagged.
async fn run_scan(config: Arc<Config>, args: ScanArgs, format: OutputFormat) -> Result<ExitCode> {
    let mut options = ScanOptions::from_config(&config);
    if let Some(threads) = args.threads {
        options = options.with_threads(threads);
    }
    if let Some(secs) = args.file_timeout {
        options = options.with_per_file_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    if let Some(secs) = args.deadline {
        options = options.with_job_deadline(Some(Duration::from_secs(secs)));
    }
    options.enable_heuristic &= !args.no_heuristic;
    options.enable_pattern_rules &= !args.no_rules;
    options.enable_statistical |= args.statistical;
    options.quarantine_on_malicious |= args.quarantine;

    let mut scanner = Scanner::new(Arc::clone(&config), options.clone());
    if options.quarantine_on_malicious {
        let store = QuarantineStore::from_config(&config.quarantine)?;
        scanner = scanner.with_quarantine(Arc::new(store));
    }

    let target = match args.paths.as_slice() {
        [single] => ScanTarget::Root(single.clone()),
        _ => ScanTarget::Files(args.paths.clone()),
    };

    let token = scanner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Cancelling scan...");
            token.cancel();
        }
    });

    let reporter = Arc::new(ConsoleProgressReporter::new());
    if format == OutputFormat::Text {
        let reporter = Arc::clone(&reporter);
        scanner
            .progress()
            .set_callback(move |progress| reporter.report(&progress));
    }

    let report = scanner.run(target).await?;
    reporter.finish();

    if let Some(path) = &args.output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .map_err(|e| hexscan::Error::file_write(path, e))?;
        log::info!("Report written to {}", path.display());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &ScanReport) {
    let job = &report.job;
    let stats = &job.statistics;

    for warning in &job.warnings {
        println!("Warning: {}", warning);
    }

    let flagged: Vec<_> = report.flagged().collect();
    if !flagged.is_empty() {
        println!();
        println!("=== Detections ===");
        for result in &flagged {
            println!(
                "[{}] {} (score {}) {}",
                result.verdict,
                result.record.path.display(),
                result.score,
                result.threat_name()
            );
            for signal in &result.signals {
                println!(
                    "    {:<11} {:<32} {:>3}  {}",
                    signal.source.to_string(),
                    signal.name,
                    signal.score,
                    signal.description
                );
            }
            if let Some(disposition) = &result.quarantine {
                println!("    quarantine: {:?}", disposition);
            }
        }
    }

    let errored: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o, FileOutcome::Errored { .. }))
        .collect();
    if !errored.is_empty() {
        println!();
        println!("=== Errors ===");
        for outcome in errored {
            if let FileOutcome::Errored { path, error } = outcome {
                println!("{}: {}", path.display(), error);
            }
        }
    }

    println!();
    println!("=== Scan {} ===", job.state);
    println!("Job ID:          {}", job.id);
    if let Some(reason) = &job.failure {
        println!("Reason:          {}", reason);
    }
    println!("Files Found:     {}", stats.files_discovered);
    println!("Files Scanned:   {}", stats.files_scanned);
    println!("Files Skipped:   {}", stats.files_skipped);
    println!("Errors:          {}", stats.files_errored);
    println!("Suspicious:      {}", stats.suspicious);
    println!("Malicious:       {}", stats.malicious);
    println!("Quarantined:     {}", stats.quarantined);
    if let Some(duration) = job.duration() {
        println!(
            "Duration:        {:.2} seconds",
            duration.num_milliseconds() as f64 / 1000.0
        );
    }
}

fn print_entries(entries: &[QuarantineEntry]) {
    if entries.is_empty() {
        println!("Quarantine is empty.");
        return;
    }

    println!(
        "{:>5}  {:<9} {:<20} {:<28} PATH",
        "ID", "STATE", "QUARANTINED", "THREAT"
    );
    for entry in entries {
        println!(
            "{:>5}  {:<9} {:<20} {:<28} {}",
            entry.id,
            entry.state.to_string(),
            entry.quarantined_at.format("%Y-%m-%d %H:%M:%S"),
            entry.threat_name,
            entry.original_path.display()
        );
    }
}

/// Manage quarantine.
fn run_quarantine(config: &Config, action: QuarantineAction, format: OutputFormat) -> Result<()> {
    let store = QuarantineStore::from_config(&config.quarantine)?;

    match action {
        QuarantineAction::List { all } => {
            let entries = if all { store.list()? } else { store.list_active()? };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Text => print_entries(&entries),
            }
        }
        QuarantineAction::Restore { id, to } => {
            let target = match to {
                Some(target) => {
                    store.restore_to(id, &target)?;
                    target
                }
                None => store.restore(id)?,
            };
            println!("Restored entry {} to {}", id, target.display());
        }
        QuarantineAction::Delete { id } => {
            store.delete(id)?;
            println!("Deleted entry {}", id);
        }
        QuarantineAction::Verify { id } => {
            store.verify(id)?;
            println!("Entry {} is intact", id);
        }
        QuarantineAction::Stats => {
            let stats = store.stats()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Text => {
                    println!("Active:     {} ({} bytes)", stats.active, stats.active_bytes);
                    println!("Restored:   {}", stats.restored);
                    println!("Deleted:    {}", stats.deleted);
                    println!("Location:   {}", store.root().display());
                }
            }
        }
        QuarantineAction::Purge { days } => {
            let days = days.unwrap_or(config.quarantine.retention_days);
            let purged = store.purge_expired(days)?;
            println!("Purged {} entries older than {} days", purged.len(), days);
        }
    }
    Ok(())
}

/// Path of the persistent signature index.
fn signature_index_path(config: &Config) -> PathBuf {
    config
        .detection
        .signature_path
        .clone()
        .unwrap_or_else(|| Config::data_dir().join("signatures.json"))
}

fn run_signatures(
    config: &Config,
    config_path: &Path,
    action: SignatureAction,
    format: OutputFormat,
) -> Result<()> {
    let index_path = signature_index_path(config);

    match action {
        SignatureAction::Import { file } => {
            let mut index = if index_path.exists() {
                SignatureIndex::load(&index_path)?
            } else {
                SignatureIndex::new()
            };
            let result = index.import_file(&file)?;
            index.export_file(&index_path)?;

            if config.detection.signature_path.is_none() {
                let mut updated = config.clone();
                updated.detection.signature_path = Some(index_path.clone());
                updated.save(config_path)?;
            }

            println!(
                "Imported {} signatures ({} skipped) into {}",
                result.added,
                result.skipped,
                index_path.display()
            );
        }
        SignatureAction::Export { file } => {
            let mut index = if config.detection.builtin_signatures {
                SignatureIndex::builtin()
            } else {
                SignatureIndex::new()
            };
            if index_path.exists() {
                index.import_file(&index_path)?;
            }
            let count = index.export_file(&file)?;
            println!("Exported {} signatures to {}", count, file.display());
        }
        SignatureAction::Info => {
            let mut index = SignatureIndex::builtin();
            if index_path.exists() {
                index.import_file(&index_path)?;
            }
            let info = index.info();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
                OutputFormat::Text => {
                    println!("Index:       {}", index_path.display());
                    println!("Version:     {}", info.version);
                    println!("Signatures:  {}", info.signature_count);
                    println!("  SHA-256:   {}", info.sha256_count);
                    println!("  MD5:       {}", info.md5_count);
                }
            }
        }
    }
    Ok(())
}

fn run_rules(config: &Config, action: RulesAction, format: OutputFormat) -> Result<()> {
    let mut engine = if config.detection.builtin_rules {
        RuleEngine::with_default_rules()?
    } else {
        RuleEngine::new()
    };
    if let Some(path) = &config.detection.rules_path {
        let report = engine.load_rules_file(path)?;
        log::info!(
            "Loaded {} rules from {} ({} skipped)",
            report.loaded,
            path.display(),
            report.skipped
        );
    }

    match action {
        RulesAction::List => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&engine.list_rules())?)
            }
            OutputFormat::Text => {
                for name in engine.list_rules() {
                    if let Some(rule) = engine.get_rule(name) {
                        println!(
                            "{:<28} {:<9} {:<8} {}",
                            rule.name,
                            rule.meta.severity.to_string(),
                            if rule.enabled { "enabled" } else { "disabled" },
                            rule.meta.description.as_deref().unwrap_or_default()
                        );
                    }
                }
            }
        },
    }
    Ok(())
}

/// Handle configuration commands.
fn run_config(config: &Config, config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Reset => {
            log::info!("Resetting configuration to defaults...");
            Config::default().save(config_path)?;
            println!("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}

/// Show application information.
fn run_info(config: &Config, config_path: &Path) -> Result<()> {
    println!("hexscan - file scanner with encrypted quarantine");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Config Path:      {}", config_path.display());
    println!("Data Directory:   {}", Config::data_dir().display());
    println!("Log Directory:    {}", config.logging.log_dir().display());
    println!("Quarantine Path:  {}", config.quarantine.quarantine_dir().display());
    println!();
    println!("Detection Settings:");
    println!("  Signatures:     {}", config.detection.enable_signatures);
    println!("  Heuristic:      {} (threshold {})", config.detection.enable_heuristic, config.detection.heuristic_threshold);
    println!("  Pattern Rules:  {}", config.detection.enable_pattern_rules);
    println!("  Statistical:    {}", config.detection.enable_statistical);
    println!();
    println!("Scan Settings:");
    println!("  Max File Size:  {} MB", config.scan.skip_large_files_mb);
    println!("  Threads:        {}", config.scan.threads);
    println!("  Skip Hidden:    {}", config.scan.skip_hidden);
    Ok(())
}

use clap::Subcommand;
use spectra_core::{config::RefetchOnMount, ApiConfig};
use std::path::Path;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

const SAMPLE_CONFIG: &str = r#"# Spectra query cache configuration

# Unused query data is dropped this long after its last subscriber leaves
keep_unused_data_for_ms = 60000
keep_prefetch_subscriptions_for_ms = 10000
keep_mutation_results_for_ms = 10000

# "never", "always" or { older_than_ms = 5000 }
refetch_on_mount_or_arg_change = "never"

# "delayed" or "immediate"
invalidation_timing = "delayed"

keep_data_on_error = true
request_timeout_ms = 30000

[retry]
max_retries = 3
base_delay_ms = 100
max_delay_ms = 2000
jitter_factor = 0.25
retry_http_5xx = false

[logging]
level = "info"
format = "pretty"
"#;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long, default_value = "config/spectra.toml")]
        file: String,
    },

    /// Show the effective configuration, including environment overrides
    Show {
        /// Path to config file
        #[arg(short, long, default_value = "config/spectra.toml")]
        file: String,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/spectra.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file } => show_config(&file),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn load(file: &str) -> CliResult<ApiConfig> {
    ApiConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = load(file)?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Unused data retention: {}ms", config.keep_unused_data_for_ms);
    println!("  Request timeout: {}", describe_timeout(config.request_timeout_ms));
    println!("  Retries: {}", config.retry.max_retries);

    Ok(())
}

fn describe_timeout(timeout_ms: u64) -> String {
    if timeout_ms == 0 {
        "none".to_string()
    } else {
        format!("{timeout_ms}ms")
    }
}

fn describe_refetch(policy: RefetchOnMount) -> String {
    match policy {
        RefetchOnMount::Never => "never".to_string(),
        RefetchOnMount::Always => "always".to_string(),
        RefetchOnMount::OlderThan(ms) => format!("when older than {ms}ms"),
    }
}

fn show_config(file: &str) -> CliResult<()> {
    let config = load(file)?;

    println!("Configuration from {file}:");

    println!("\n[Retention]");
    println!("  Unused data: {}ms", config.keep_unused_data_for_ms);
    println!("  Prefetch subscriptions: {}ms", config.keep_prefetch_subscriptions_for_ms);
    println!("  Mutation results: {}ms", config.keep_mutation_results_for_ms);

    println!("\n[Fetching]");
    println!("  Refetch on mount: {}", describe_refetch(config.refetch_on_mount_or_arg_change));
    println!("  Invalidation timing: {:?}", config.invalidation_timing);
    println!("  Keep data on error: {}", config.keep_data_on_error);
    println!("  Request timeout: {}", describe_timeout(config.request_timeout_ms));

    println!("\n[Retry]");
    println!("  Max retries: {}", config.retry.max_retries);
    println!("  Backoff: {}ms base, {}ms cap", config.retry.base_delay_ms, config.retry.max_delay_ms);
    println!("  Jitter: {}", config.retry.jitter_factor);
    println!("  Retry HTTP 5xx: {}", config.retry.retry_http_5xx);

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration generated: {output}"));
    Ok(())
}

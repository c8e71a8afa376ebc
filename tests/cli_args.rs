//! Integration tests for CLI argument handling
//!
//! Runs the binary; network cases point it at a local mock server.

use std::process::Command;

use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_steadyfetch"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute steadyfetch")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(
        output.status.success(),
        "Expected --help to exit successfully"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("steadyfetch"), "Help should mention steadyfetch");
    assert!(stdout.contains("fetch"), "Help should list the fetch command");
    assert!(stdout.contains("stats"), "Help should list the stats command");
}

#[test]
fn test_relative_path_prints_error_and_exits() {
    let output = run_cli(&["fetch", "cards/random"]);
    assert!(!output.status.success(), "Expected relative path to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Invalid path"),
        "Should explain the invalid path: {}",
        stderr
    );
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
}

#[test]
fn test_bad_base_url_exits_with_error() {
    let output = run_cli(&["--base-url", "not-a-url", "--no-disk-cache", "stats"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr: {}", stderr);
    assert!(stderr.contains("base_url"), "stderr: {}", stderr);
}

#[test]
fn test_stats_on_fresh_cache_dir() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let dir = temp_dir.path().to_string_lossy().to_string();

    let output = run_cli(&["--cache-dir", &dir, "stats", "--json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stats --json prints JSON");
    assert_eq!(report["cache"]["disk_entries"], 0);
    assert_eq!(report["circuit"]["state"], "Closed");
}

#[test]
fn test_memory_only_clear_and_cleanup() {
    let output = run_cli(&["--no-disk-cache", "clear"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Caches cleared"));

    let output = run_cli(&["--no-disk-cache", "cleanup"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 0 expired entries"));
}

#[test]
fn test_upstream_failure_prints_user_message() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/cards/random")
        .with_status(503)
        .create();

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("steadyfetch.toml");
    let config = format!(
        "base_url = \"{}\"\nmin_request_interval_ms = 0\nretry_backoff_base_ms = 1\n\
         disk_cache_enabled = false\n",
        server.url()
    );
    std::fs::write(&config_path, config).expect("Failed to write config");
    let config_arg = config_path.to_string_lossy().to_string();

    let output = run_cli(&["--config", &config_arg, "fetch", "/cards/random"]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    let error_line = stderr
        .lines()
        .find(|line| line.starts_with("error:"))
        .expect("an error line on stderr");
    assert_eq!(error_line, "error: service unavailable, try again");
    assert!(!error_line.contains("503"), "status detail stays out: {}", error_line);
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use steadyfetch::cli::{parse_resource_path, resolve_config, Cli, Command};

    #[test]
    fn test_cli_fetch_path() {
        let cli = Cli::parse_from(["steadyfetch", "fetch", "/sets"]);
        assert_eq!(
            cli.command,
            Command::Fetch {
                path: "/sets".to_string()
            }
        );
    }

    #[test]
    fn test_cli_stats_defaults_to_text() {
        let cli = Cli::parse_from(["steadyfetch", "stats"]);
        assert_eq!(cli.command, Command::Stats { json: false });
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_resource_path_rejects_whitespace() {
        assert!(parse_resource_path("/cards/named?exact=black lotus").is_err());
    }

    #[test]
    fn test_resolve_config_defaults() {
        let cli = Cli::parse_from(["steadyfetch", "stats"]);
        let config = resolve_config(&cli).expect("defaults are valid");
        assert_eq!(config.base_url, "https://api.scryfall.com");
        assert!(config.disk_cache_enabled);
    }
}

//!
//! usermeta server binary
//! ----------------------
//! Command-line entry point for the usermeta HTTP server. Configuration comes from
//! `USERMETA_*` environment variables, overridden by CLI flags.

use anyhow::Result;
use std::env;

use usermeta::config::ServerConfig;

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

const USAGE: &str = "usermeta Server

USAGE:
  usermeta_server [--http-port N] [--env dev|prod] [--allowed-origin ORIGIN]
                  [--secure-cookies|--no-secure-cookies] [--artificial-delay|--no-artificial-delay]
                  [--demo-email EMAIL --demo-password PASSWORD]

OPTIONS:
  --http-port N            HTTP port (env: USERMETA_HTTP_PORT, default 7878)
  --env dev|prod           Runtime environment (env: USERMETA_ENV, default dev)
  --allowed-origin ORIGIN  CORS allowed origin (env: USERMETA_ALLOWED_ORIGIN, default *)
  --secure-cookies [bool]  Mark session cookies Secure (env: USERMETA_COOKIE_SECURE)
  --artificial-delay       Random 100-500ms latency per call, dev only (env: USERMETA_ARTIFICIAL_DELAY)
  --demo-email EMAIL       Seed account email (env: USERMETA_DEMO_EMAIL)
  --demo-password PASS     Seed account password (env: USERMETA_DEMO_PASSWORD)

Session lifetimes: USERMETA_ACCESS_TTL_SECS (3600), USERMETA_REFRESH_TTL_SECS (8640000).
Expired-session sweep interval: USERMETA_SWEEP_INTERVAL_SECS (60, 0 disables).
";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = ServerConfig::from_env().apply_args(&args);
    if config.demo_email.is_some() != config.demo_password.is_some() {
        tracing::warn!("demo account needs both an email and a password; skipping");
    }
    println!("usermeta starting using port: http={}, env={}", config.http_port, config.environment.as_str());
    usermeta::server::run_with_config(config).await
}

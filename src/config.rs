//!
//! usermeta server configuration
//! -----------------------------
//! Resolved in three layers: built-in defaults, then `USERMETA_*` environment
//! variables, then command-line flags. Unparseable values are ignored and the
//! previous layer wins.

use std::time::Duration;

pub const DEFAULT_HTTP_PORT: u16 = 7878;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Some(Environment::Development),
            "prod" | "production" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub environment: Environment,
    /// Value of `Access-Control-Allow-Origin` on RPC responses.
    pub allowed_origin: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Add `Secure` to session cookies.
    pub cookie_secure: bool,
    /// Random 100-500ms delay before each procedure; honoured in development only.
    pub artificial_delay: bool,
    /// Seed account created at startup when both are set.
    pub demo_email: Option<String>,
    pub demo_password: Option<String>,
    /// Seconds between expired-session sweeps; 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_port: DEFAULT_HTTP_PORT,
            environment: Environment::Development,
            allowed_origin: "*".to_string(),
            access_ttl: Duration::from_secs(60 * 60),
            refresh_ttl: Duration::from_secs(100 * 24 * 60 * 60),
            cookie_secure: false,
            artificial_delay: false,
            demo_email: None,
            demo_password: None,
            sweep_interval_secs: 60,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

/// `--flag` alone means true; `--flag false` etc. is honoured when the next token is not a flag.
fn arg_switch(args: &[String], flag: &str, negated: &str) -> Option<bool> {
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if a == negated {
            return Some(false);
        }
        if a == flag {
            if i + 1 < args.len() && !args[i + 1].starts_with('-') {
                return Some(parse_bool(&args[i + 1]).unwrap_or(true));
            }
            return Some(true);
        }
        i += 1;
    }
    None
}

impl ServerConfig {
    /// Layer environment values over the defaults using `lookup` as the variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = ServerConfig::default();
        if let Some(p) = lookup("USERMETA_HTTP_PORT").and_then(|v| v.parse::<u16>().ok()) { cfg.http_port = p; }
        if let Some(e) = lookup("USERMETA_ENV").as_deref().and_then(Environment::parse) { cfg.environment = e; }
        if let Some(o) = lookup("USERMETA_ALLOWED_ORIGIN").filter(|s| !s.trim().is_empty()) { cfg.allowed_origin = o; }
        if let Some(s) = lookup("USERMETA_ACCESS_TTL_SECS").and_then(|v| v.parse::<u64>().ok()) { cfg.access_ttl = Duration::from_secs(s); }
        if let Some(s) = lookup("USERMETA_REFRESH_TTL_SECS").and_then(|v| v.parse::<u64>().ok()) { cfg.refresh_ttl = Duration::from_secs(s); }
        if let Some(b) = lookup("USERMETA_COOKIE_SECURE").as_deref().and_then(parse_bool) { cfg.cookie_secure = b; }
        if let Some(b) = lookup("USERMETA_ARTIFICIAL_DELAY").as_deref().and_then(parse_bool) { cfg.artificial_delay = b; }
        if let Some(s) = lookup("USERMETA_SWEEP_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) { cfg.sweep_interval_secs = s; }
        cfg.demo_email = lookup("USERMETA_DEMO_EMAIL").filter(|s| !s.is_empty());
        cfg.demo_password = lookup("USERMETA_DEMO_PASSWORD").filter(|s| !s.is_empty());
        cfg
    }

    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Command-line flags override whatever the environment set.
    pub fn apply_args(mut self, args: &[String]) -> Self {
        if let Some(p) = arg_value(args, "--http-port").and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(e) = arg_value(args, "--env").and_then(Environment::parse) { self.environment = e; }
        if let Some(o) = arg_value(args, "--allowed-origin") { self.allowed_origin = o.to_string(); }
        if let Some(b) = arg_switch(args, "--secure-cookies", "--no-secure-cookies") { self.cookie_secure = b; }
        if let Some(b) = arg_switch(args, "--artificial-delay", "--no-artificial-delay") { self.artificial_delay = b; }
        if let Some(e) = arg_value(args, "--demo-email") { self.demo_email = Some(e.to_string()); }
        if let Some(p) = arg_value(args, "--demo-password") { self.demo_password = Some(p.to_string()); }
        self
    }

    pub fn timing_enabled(&self) -> bool {
        self.artificial_delay && self.environment == Environment::Development
    }

    pub fn demo_account(&self) -> Option<(&str, &str)> {
        match (&self.demo_email, &self.demo_password) {
            (Some(e), Some(p)) => Some((e.as_str(), p.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(s: &[&str]) -> Vec<String> { s.iter().map(|a| a.to_string()).collect() }

    #[test]
    fn defaults_without_environment() {
        let cfg = ServerConfig::from_lookup(|_| None);
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(cfg.allowed_origin, "*");
        assert_eq!(cfg.access_ttl, Duration::from_secs(3600));
        assert!(!cfg.cookie_secure);
        assert!(cfg.demo_account().is_none());
    }

    #[test]
    fn environment_then_flags() {
        let env: HashMap<&str, &str> = [
            ("USERMETA_HTTP_PORT", "9000"),
            ("USERMETA_ENV", "production"),
            ("USERMETA_COOKIE_SECURE", "yes"),
            ("USERMETA_ACCESS_TTL_SECS", "not-a-number"),
            ("USERMETA_DEMO_EMAIL", "demo@example.com"),
            ("USERMETA_DEMO_PASSWORD", "demo"),
        ]
        .into_iter()
        .collect();
        let cfg = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.environment, Environment::Production);
        assert!(cfg.cookie_secure);
        assert_eq!(cfg.access_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.demo_account(), Some(("demo@example.com", "demo")));

        let cfg = cfg.apply_args(&args(&["usermeta_server", "--http-port", "9100", "--no-secure-cookies", "--env", "dev"]));
        assert_eq!(cfg.http_port, 9100);
        assert!(!cfg.cookie_secure);
        assert_eq!(cfg.environment, Environment::Development);
    }

    #[test]
    fn artificial_delay_only_in_development() {
        let mut cfg = ServerConfig::default().apply_args(&args(&["--artificial-delay"]));
        assert!(cfg.timing_enabled());
        cfg.environment = Environment::Production;
        assert!(!cfg.timing_enabled());
        let cfg = ServerConfig::default().apply_args(&args(&["--artificial-delay", "off"]));
        assert!(!cfg.timing_enabled());
    }
}

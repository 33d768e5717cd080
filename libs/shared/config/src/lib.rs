use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    /// Argon2 PHC string for the supervisor override secret.
    pub override_credential_hash: String,
    pub override_max_failed_attempts: u32,
    pub override_lockout_minutes: i64,
    pub event_bus_capacity: usize,
    pub bind_address: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            override_credential_hash: env::var("OVERRIDE_CREDENTIAL_HASH")
                .unwrap_or_else(|_| {
                    warn!("OVERRIDE_CREDENTIAL_HASH not set, payment overrides are disabled");
                    String::new()
                }),
            override_max_failed_attempts: parse_or("OVERRIDE_MAX_FAILED_ATTEMPTS", 5),
            override_lockout_minutes: parse_or("OVERRIDE_LOCKOUT_MINUTES", 15),
            event_bus_capacity: parse_or("EVENT_BUS_CAPACITY", 256),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_override_configured(&self) -> bool {
        !self.override_credential_hash.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            redis_url: None,
            override_credential_hash: String::new(),
            override_max_failed_attempts: 5,
            override_lockout_minutes: 15,
            event_bus_capacity: 256,
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

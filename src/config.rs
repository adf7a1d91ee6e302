use anyhow::{Context, Result};
use std::{env, path::PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs the engine on the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub data_dir: PathBuf,
    pub payment_gateway_url: Option<String>,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = parse_var("PORT", 8081u16)?;
        let public_base_url =
            env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));
        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            port,
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".into())),
            payment_gateway_url: non_empty("PAYMENT_GATEWAY_URL"),
            public_base_url,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            log_filter: env::var("RUST_LOG")
                .unwrap_or_else(|_| "course_engine=info,axum=info".into()),
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(key) {
        Some(v) => v.trim().parse().with_context(|| format!("{key} is not valid: `{v}`")),
        None => Ok(default),
    }
}

use anyhow::{Error, anyhow};
use dotenv::dotenv;
use std::env;
use std::str::FromStr;

pub fn get_env_var(key: &str) -> Result<String, Error> {
    dotenv().ok();
    env::var(key).map_err(|e| anyhow!("{}: {}", key, e))
}

// unset or blank variables read as None
pub fn get_optional_env_var(key: &str) -> Option<String> {
    dotenv().ok();
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        _ => None,
    }
}

pub fn parse_env_var<T>(key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_env_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid value for {}: {}", key, e)),
        None => Ok(None),
    }
}

pub fn env_var_to_bool(key: &str) -> Option<bool> {
    get_optional_env_var(key).map(|raw| {
        matches!(
            raw.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! Server configuration.
//!
//! Every setting comes from a command-line flag, falling back to an
//! environment variable, then to a compiled default.
use crate::calendar::Calendar;
use crate::state::DEFAULT_MAX_MESSAGE_LEN;
use chrono::FixedOffset;
use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://database/streak.db";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("UTC offset of {0} minutes is out of range")]
    InvalidUtcOffset(i32),

    #[error("maximum message length must be at least 1")]
    InvalidMaxMessageLen,
}

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Streak tracker and group chat server")]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(short, long, env = "STREAK_BIND")]
    pub bind: Option<String>,

    /// SQLite database URL. The file is created if missing.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Reference time zone as minutes east of UTC. Decides where a day ends.
    #[arg(long, env = "STREAK_UTC_OFFSET_MINUTES", allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,

    /// Longest accepted chat message, in characters.
    #[arg(long, env = "STREAK_MAX_MESSAGE_LEN")]
    pub max_message_len: Option<usize>,

    /// Allowed CORS origin. Repeat or comma-separate; none means any origin.
    #[arg(long = "allowed-origin", env = "STREAK_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Log level filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info", env = "STREAK_LOG")]
    pub log_level: String,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub calendar: Calendar,
    pub max_message_len: usize,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
}

impl ServerConfig {
    /// Validates the arguments and fills in defaults.
    pub fn resolve(args: &ServerArgs) -> Result<Self, ConfigError> {
        let bind = args.bind.as_deref().unwrap_or(DEFAULT_BIND);
        let bind_addr = bind
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBindAddress(bind.to_string()))?;

        let offset_minutes = args.utc_offset_minutes.unwrap_or(0);
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidUtcOffset(offset_minutes))?;

        let max_message_len = args.max_message_len.unwrap_or(DEFAULT_MAX_MESSAGE_LEN);
        if max_message_len == 0 {
            return Err(ConfigError::InvalidMaxMessageLen);
        }

        let allowed_origins = args
            .allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            bind_addr,
            database_url: args
                .database_url
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            calendar: Calendar::new(offset),
            max_message_len,
            allowed_origins,
            log_level: args.log_level.clone(),
        })
    }
}

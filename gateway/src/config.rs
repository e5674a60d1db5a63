//! Gateway configuration
//!
//! Command-line flags with environment fallbacks.

use arena_feed::FeedConfig;
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use targeting::DEFAULT_EPSILON_DEG;
use turret_control::StepperConfig;

/// Turret gateway: aiming, zero calibration and arena feed queries over HTTP
#[derive(Parser, Debug, Clone)]
#[command(name = "turret-gateway")]
#[command(version)]
#[command(about = "HTTP gateway for the two-axis turret")]
pub struct Config {
    /// Interface to listen on
    #[arg(long, env = "TURRET_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Listening port
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Zero calibration record
    #[arg(long, env = "TURRET_ZERO_FILE", default_value = "zero.json")]
    pub zero_file: PathBuf,

    /// Static arena snapshot served at /positions.json
    #[arg(long, env = "TURRET_FIXTURE", default_value = "fixtures/positions.json")]
    pub fixture: PathBuf,

    /// Arena feed request timeout
    #[arg(long, env = "TURRET_FEED_TIMEOUT_SECS", default_value_t = 5)]
    pub feed_timeout_secs: u64,

    /// Moves smaller than this are skipped
    #[arg(long, env = "TURRET_EPSILON_DEG", default_value_t = DEFAULT_EPSILON_DEG)]
    pub epsilon_deg: f64,

    /// Stepper resolution
    #[arg(long, env = "TURRET_STEPS_PER_REV", default_value_t = 4096)]
    pub steps_per_rev: u32,

    /// Delay per step, microseconds
    #[arg(long, env = "TURRET_STEP_DELAY_US", default_value_t = 1200)]
    pub step_delay_us: u64,

    /// Longest single move in steps; larger moves are rejected
    #[arg(long, env = "TURRET_MAX_STEPS_PER_MOVE", default_value_t = 8 * 4096)]
    pub max_steps_per_move: u32,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            timeout: Duration::from_secs(self.feed_timeout_secs),
        }
    }

    pub fn stepper_config(&self) -> StepperConfig {
        StepperConfig {
            steps_per_rev: self.steps_per_rev,
            step_delay: Duration::from_micros(self.step_delay_us),
            max_steps_per_move: self.max_steps_per_move,
            fault_on_move: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.epsilon_deg.is_finite() && self.epsilon_deg >= 0.0) {
            return Err(format!("epsilon must be a non-negative angle, got {}", self.epsilon_deg));
        }
        if self.feed_timeout_secs == 0 {
            return Err("feed timeout must be at least one second".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "turret-gateway",
            "--bind",
            "127.0.0.1",
            "--port",
            "8080",
            "--zero-file",
            "/var/lib/turret/zero.json",
            "--feed-timeout-secs",
            "2",
            "--epsilon-deg",
            "0.05",
            "--step-delay-us",
            "0",
        ])
        .unwrap();

        assert_eq!(config.addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.zero_file, PathBuf::from("/var/lib/turret/zero.json"));
        assert_eq!(config.feed_config().timeout, Duration::from_secs(2));
        assert_eq!(config.epsilon_deg, 0.05);
        assert!(config.stepper_config().step_delay.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::try_parse_from(["turret-gateway", "--port", "http"]).is_err());

        let config =
            Config::try_parse_from(["turret-gateway", "--epsilon-deg=-1", "--feed-timeout-secs", "3"]).unwrap();
        assert!(config.validate().is_err());
    }
}

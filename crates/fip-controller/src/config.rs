//! Controller configuration
//!
//! Options come from three layers, highest precedence first:
//!
//! 1. command line flags and their environment variables ([`Cli`])
//! 2. an optional JSON file ([`FileConfig`], `--config` or `config/config.json`)
//! 3. built-in defaults
//!
//! [`Config::validate`] checks the merged result and reports every problem at
//! once before any client is built.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use fip_common::retry::Backoff;
use fip_common::telemetry::{LogFormat, LoggingConfig};
use fip_common::{Error, Result};
use fip_hcloud::DEFAULT_ENDPOINT;

/// File read when `--config` is not given, if it exists
pub const DEFAULT_CONFIG_FILE: &str = "config/config.json";

const DEFAULT_LEASE_NAME: &str = "fip";
const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_LEASE_RENEW_DEADLINE: Duration = Duration::from_secs(10);
const DEFAULT_LEASE_RETRY_PERIOD: Duration = Duration::from_secs(2);
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Which node address is used to find a node's cloud instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// The node's `ExternalIP` address
    #[default]
    External,
    /// The node's `InternalIP` address
    Internal,
}

impl AddressType {
    /// Node address type as reported in `status.addresses`
    pub fn node_address_type(&self) -> &'static str {
        match self {
            Self::External => "ExternalIP",
            Self::Internal => "InternalIP",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => f.write_str("external"),
            Self::Internal => f.write_str("internal"),
        }
    }
}

/// Where the managed floating IPs come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FloatingIpSource {
    /// A fixed list of addresses, resolved against the live inventory
    Addresses(Vec<IpAddr>),
    /// Every floating IP matching a label selector
    Selector(String),
}

/// Keeps Hetzner Cloud floating IPs assigned to healthy cluster nodes
#[derive(Parser, Debug, Default)]
#[command(name = "fip-controller", version, about, long_about = None)]
pub struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Hetzner Cloud API token
    #[arg(long, env = "HCLOUD_API_TOKEN", hide_env_values = true)]
    pub hcloud_api_token: Option<String>,

    /// Hetzner Cloud API endpoint
    #[arg(long, env = "HCLOUD_ENDPOINT")]
    pub hcloud_endpoint: Option<String>,

    /// Floating IP address to manage (repeatable)
    #[arg(long = "hcloud-floating-ip", env = "HCLOUD_FLOATING_IPS", value_delimiter = ',')]
    pub hcloud_floating_ips: Vec<String>,

    /// Label selector choosing the floating IPs to manage
    #[arg(long, env = "FLOATING_IP_LABEL_SELECTOR")]
    pub floating_ip_label_selector: Option<String>,

    /// Node address type used to find a node's instance
    #[arg(long, env = "NODE_ADDRESS_TYPE", value_enum)]
    pub node_address_type: Option<AddressType>,

    /// Label selector restricting the candidate nodes
    #[arg(long, env = "NODE_LABEL_SELECTOR")]
    pub node_label_selector: Option<String>,

    /// Label selector for the controller's own pods
    #[arg(long, env = "POD_LABEL_SELECTOR")]
    pub pod_label_selector: Option<String>,

    /// Namespace of the controller pods and lease
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of this controller pod, used as lease identity
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Name of the leader election lease
    #[arg(long, env = "LEASE_NAME")]
    pub lease_name: Option<String>,

    /// How long a lease is valid without renewal
    #[arg(long, env = "LEASE_DURATION")]
    pub lease_duration: Option<humantime::Duration>,

    /// How long the leader keeps trying to renew before giving up
    #[arg(long, env = "LEASE_RENEW_DEADLINE")]
    pub lease_renew_deadline: Option<humantime::Duration>,

    /// Interval between lease acquisition and renewal attempts
    #[arg(long, env = "LEASE_RETRY_PERIOD")]
    pub lease_retry_period: Option<humantime::Duration>,

    /// Delay after the first failed API call
    #[arg(long, env = "BACKOFF_DURATION")]
    pub backoff_duration: Option<humantime::Duration>,

    /// Multiplier applied to the retry delay after each failure
    #[arg(long, env = "BACKOFF_FACTOR")]
    pub backoff_factor: Option<f64>,

    /// Maximum attempts per API call
    #[arg(long, env = "BACKOFF_STEPS")]
    pub backoff_steps: Option<u32>,

    /// Time between reconciliation cycles
    #[arg(long, env = "RECONCILE_INTERVAL")]
    pub reconcile_interval: Option<humantime::Duration>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Options read from the JSON configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Hetzner Cloud API token
    pub hcloud_api_token: Option<String>,
    /// Hetzner Cloud API endpoint
    pub hcloud_endpoint: Option<String>,
    /// Floating IP addresses to manage
    pub hcloud_floating_ips: Vec<String>,
    /// Label selector choosing the floating IPs to manage
    pub floating_ip_label_selector: Option<String>,
    /// Node address type
    pub node_address_type: Option<AddressType>,
    /// Node label selector
    pub node_label_selector: Option<String>,
    /// Pod label selector
    pub pod_label_selector: Option<String>,
    /// Namespace
    pub namespace: Option<String>,
    /// Pod name
    pub pod_name: Option<String>,
    /// Lease name
    pub lease_name: Option<String>,
    /// Lease duration
    #[serde(with = "humantime_serde")]
    pub lease_duration: Option<Duration>,
    /// Lease renew deadline
    #[serde(with = "humantime_serde")]
    pub lease_renew_deadline: Option<Duration>,
    /// Lease retry period
    #[serde(with = "humantime_serde")]
    pub lease_retry_period: Option<Duration>,
    /// Initial backoff delay
    #[serde(with = "humantime_serde")]
    pub backoff_duration: Option<Duration>,
    /// Backoff factor
    pub backoff_factor: Option<f64>,
    /// Backoff steps
    pub backoff_steps: Option<u32>,
    /// Reconcile interval
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Option<Duration>,
    /// Log level
    pub log_level: Option<String>,
    /// Log format
    pub log_format: Option<String>,
}

impl FileConfig {
    /// Read and parse a configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::configuration(format!("failed to decode config file {}: {}", path.display(), e))
        })
    }
}

/// Fully merged controller configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Hetzner Cloud API token
    pub hcloud_api_token: String,
    /// Hetzner Cloud API endpoint
    pub hcloud_endpoint: String,
    /// Floating IP addresses to manage (exclusive with the label selector)
    pub hcloud_floating_ips: Vec<String>,
    /// Label selector choosing the floating IPs to manage
    pub floating_ip_label_selector: Option<String>,
    /// Node address type
    pub node_address_type: AddressType,
    /// Label selector restricting candidate nodes
    pub node_label_selector: Option<String>,
    /// Label selector for the controller's own pods
    pub pod_label_selector: Option<String>,
    /// Namespace of the controller pods and lease
    pub namespace: String,
    /// Name of this controller pod
    pub pod_name: String,
    /// Lease name
    pub lease_name: String,
    /// Lease validity without renewal
    pub lease_duration: Duration,
    /// Renewal give-up deadline
    pub lease_renew_deadline: Duration,
    /// Acquire/renew cadence
    pub lease_retry_period: Duration,
    /// Initial retry delay
    pub backoff_duration: Duration,
    /// Retry delay multiplier
    pub backoff_factor: f64,
    /// Maximum attempts per API call
    pub backoff_steps: u32,
    /// Time between reconciliation cycles
    pub reconcile_interval: Duration,
    /// Log level
    pub log_level: String,
    /// Log format
    pub log_format: LogFormat,
}

impl Config {
    /// Load the configuration file (if any) and merge it with the command line
    pub fn load(cli: Cli) -> Result<Self> {
        let file = match cli.config.as_deref() {
            Some(path) => FileConfig::from_path(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                FileConfig::from_path(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// Merge command line and file options over the defaults
    pub fn merge(cli: Cli, file: FileConfig) -> Result<Self> {
        let backoff = Backoff::default();

        let log_format = match cli.log_format {
            Some(format) => format,
            None => file
                .log_format
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(Error::configuration)?
                .unwrap_or_default(),
        };

        let hcloud_floating_ips = if cli.hcloud_floating_ips.is_empty() {
            file.hcloud_floating_ips
        } else {
            cli.hcloud_floating_ips
        };

        Ok(Self {
            hcloud_api_token: cli
                .hcloud_api_token
                .or(file.hcloud_api_token)
                .unwrap_or_default(),
            hcloud_endpoint: cli
                .hcloud_endpoint
                .or(file.hcloud_endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            hcloud_floating_ips,
            floating_ip_label_selector: non_empty(
                cli.floating_ip_label_selector
                    .or(file.floating_ip_label_selector),
            ),
            node_address_type: cli
                .node_address_type
                .or(file.node_address_type)
                .unwrap_or_default(),
            node_label_selector: non_empty(cli.node_label_selector.or(file.node_label_selector)),
            pod_label_selector: non_empty(cli.pod_label_selector.or(file.pod_label_selector)),
            namespace: cli.namespace.or(file.namespace).unwrap_or_default(),
            pod_name: cli.pod_name.or(file.pod_name).unwrap_or_default(),
            lease_name: cli
                .lease_name
                .or(file.lease_name)
                .unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string()),
            lease_duration: duration_or(
                cli.lease_duration,
                file.lease_duration,
                DEFAULT_LEASE_DURATION,
            ),
            lease_renew_deadline: duration_or(
                cli.lease_renew_deadline,
                file.lease_renew_deadline,
                DEFAULT_LEASE_RENEW_DEADLINE,
            ),
            lease_retry_period: duration_or(
                cli.lease_retry_period,
                file.lease_retry_period,
                DEFAULT_LEASE_RETRY_PERIOD,
            ),
            backoff_duration: duration_or(
                cli.backoff_duration,
                file.backoff_duration,
                backoff.initial_delay,
            ),
            backoff_factor: cli
                .backoff_factor
                .or(file.backoff_factor)
                .unwrap_or(backoff.factor),
            backoff_steps: cli
                .backoff_steps
                .or(file.backoff_steps)
                .unwrap_or(backoff.steps),
            reconcile_interval: duration_or(
                cli.reconcile_interval,
                file.reconcile_interval,
                DEFAULT_RECONCILE_INTERVAL,
            ),
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }

    /// Check the configuration, reporting every problem found
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        let mut errors = Vec::new();

        if self.hcloud_api_token.is_empty() {
            missing.push("hetzner cloud API token");
        }
        if self.namespace.is_empty() {
            missing.push("kubernetes namespace");
        }
        if self.pod_name.is_empty() {
            missing.push("kubernetes pod name");
        }

        match (
            self.hcloud_floating_ips.is_empty(),
            self.floating_ip_label_selector.is_some(),
        ) {
            (true, false) => {
                missing.push("hetzner cloud floating IPs or floating IP label selector")
            }
            (false, true) => errors.push(
                "floating IP addresses and floating IP label selector are mutually exclusive"
                    .to_string(),
            ),
            _ => {}
        }
        for address in &self.hcloud_floating_ips {
            if address.parse::<IpAddr>().is_err() {
                errors.push(format!("invalid floating IP address '{address}'"));
            }
        }

        if self.lease_duration.is_zero() {
            errors.push("lease duration must be greater than zero".to_string());
        }
        if self.lease_renew_deadline.is_zero() {
            errors.push("lease renew deadline must be greater than zero".to_string());
        }
        if self.lease_retry_period.is_zero() {
            errors.push("lease retry period must be greater than zero".to_string());
        }
        if self.lease_renew_deadline >= self.lease_duration {
            errors.push("lease renew deadline must be shorter than the lease duration".to_string());
        }
        if self.lease_retry_period >= self.lease_renew_deadline {
            errors.push("lease retry period must be shorter than the renew deadline".to_string());
        }

        if self.backoff_duration.is_zero() {
            errors.push("backoff duration must be greater than zero".to_string());
        }
        if self.backoff_steps == 0 {
            errors.push("backoff steps must be greater than zero".to_string());
        }
        if !self.backoff_factor.is_finite() {
            errors.push("backoff factor must be a finite number".to_string());
        } else if self.backoff_factor < 1.0 {
            errors.push("backoff factor must be at least 1".to_string());
        }
        if self.reconcile_interval.is_zero() {
            errors.push("reconcile interval must be greater than zero".to_string());
        }

        if !missing.is_empty() {
            errors.push(format!(
                "required configuration options not configured: {}",
                missing.join(", ")
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration(errors.join("; ")))
        }
    }

    /// The floating IP source; call after [`validate`](Self::validate)
    pub fn floating_ip_source(&self) -> Result<FloatingIpSource> {
        if let Some(ref selector) = self.floating_ip_label_selector {
            return Ok(FloatingIpSource::Selector(selector.clone()));
        }
        let addresses = self
            .hcloud_floating_ips
            .iter()
            .map(|a| {
                a.parse()
                    .map_err(|_| Error::configuration(format!("invalid floating IP address '{a}'")))
            })
            .collect::<Result<Vec<IpAddr>>>()?;
        Ok(FloatingIpSource::Addresses(addresses))
    }

    /// Retry policy for API calls
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_delay: self.backoff_duration,
            factor: self.backoff_factor,
            steps: self.backoff_steps,
            max_delay: self.backoff_duration.max(Backoff::default().max_delay),
        }
    }

    /// Logging settings
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn duration_or(
    cli: Option<humantime::Duration>,
    file: Option<Duration>,
    default: Duration,
) -> Duration {
    cli.map(Into::into).or(file).unwrap_or(default)
}

use std::ffi::OsString;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::Level;

use crate::error::ConfigError;
use crate::logging::LogFormat;

pub const DEFAULT_BIND: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 10067));
pub const DEFAULT_BOOT_FILENAME: &str = "/usr/lib/ipxe/ipxe.efi";
pub const DEFAULT_VENDOR_IDENTIFIER: &str = "HTTPClient";
pub const DEFAULT_CLIENT_PORT: u16 = 68;

/// `fname` is 128 bytes including the terminating NUL
const MAX_BOOT_FILENAME: usize = 127;

pub const USAGE: &str = "\
netbootd - PXE boot negotiation server

USAGE:
  netbootd [OPTIONS]

OPTIONS:
  --config <path>         JSON config file, re-read on SIGHUP
  --bind <addr:port>      listen address [default: 0.0.0.0:10067]
  --interface <name>      interface to serve
  --boot-file <path>      boot filename offered to clients [default: /usr/lib/ipxe/ipxe.efi]
  --pool-begin <ipv4>     first address of the lease pool
  --pool-end <ipv4>       last address of the lease pool
  --notify <host:port>    machine registry receiving decline events
  --mgmt <addr:port>      management listener
  --log-level <level>     trace, debug, info, warn, error [default: info]
  --log-json              log as JSON lines
  -h, --help              print this help
";

/// What the Offer tells the firmware. Reloadable at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSettings {
    pub boot_filename: String,
    /// Option 60 in the Offer
    pub vendor_identifier: String,
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            boot_filename: DEFAULT_BOOT_FILENAME.to_string(),
            vendor_identifier: DEFAULT_VENDOR_IDENTIFIER.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    /// Accepted for compatibility, replies always leave through the interface
    /// the request arrived on
    pub interface: Option<String>,
    pub pool_begin: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub boot: BootSettings,
    pub client_port: u16,
    pub notify: Option<String>,
    pub mgmt: Option<SocketAddr>,
    pub log_level: Level,
    pub log_format: LogFormat,
    /// File the config was read from, if any
    pub path: Option<PathBuf>,
    overrides: Overrides,
}

/// On-disk JSON layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<SocketAddr>,
    pub interface: Option<String>,
    pub pool_begin: Option<Ipv4Addr>,
    pub pool_end: Option<Ipv4Addr>,
    pub boot_filename: Option<String>,
    pub vendor_identifier: Option<String>,
    pub client_port: Option<u16>,
    pub notify: Option<String>,
    pub mgmt: Option<SocketAddr>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

/// Command line flags, applied on top of the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub interface: Option<String>,
    pub boot_filename: Option<String>,
    pub pool_begin: Option<Ipv4Addr>,
    pub pool_end: Option<Ipv4Addr>,
    pub notify: Option<String>,
    pub mgmt: Option<SocketAddr>,
    pub log_level: Option<String>,
    pub log_json: bool,
}

impl Config {
    /// Build the config from process arguments, reading `--config` if given
    pub fn from_args(mut args: pico_args::Arguments) -> Result<Self, ConfigError> {
        let path: Option<PathBuf> = args.opt_value_from_str("--config")?;
        let overrides = Overrides {
            bind: args.opt_value_from_str("--bind")?,
            interface: args.opt_value_from_str("--interface")?,
            boot_filename: args.opt_value_from_str("--boot-file")?,
            pool_begin: args.opt_value_from_str("--pool-begin")?,
            pool_end: args.opt_value_from_str("--pool-end")?,
            notify: args.opt_value_from_str("--notify")?,
            mgmt: args.opt_value_from_str("--mgmt")?,
            log_level: args.opt_value_from_str("--log-level")?,
            log_json: args.contains("--log-json"),
        };

        let rest = args.finish();
        if !rest.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "unexpected arguments: {}",
                join_os(&rest)
            )));
        }

        Self::load(path, overrides)
    }

    pub fn load(path: Option<PathBuf>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match &path {
            Some(p) => read_file(p)?,
            None => FileConfig::default(),
        };
        Self::from_parts(file, path, overrides)
    }

    /// Re-read the config file with the same command line flags applied
    pub fn reload(&self) -> Result<Self, ConfigError> {
        Self::load(self.path.clone(), self.overrides.clone())
    }

    pub fn from_parts(
        file: FileConfig,
        path: Option<PathBuf>,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        let pool_begin = overrides
            .pool_begin
            .or(file.pool_begin)
            .ok_or(ConfigError::Missing("pool_begin"))?;
        let pool_end = overrides
            .pool_end
            .or(file.pool_end)
            .ok_or(ConfigError::Missing("pool_end"))?;

        let log_level = match overrides.log_level.as_ref().or(file.log_level.as_ref()) {
            Some(level) => level
                .parse::<Level>()
                .map_err(|_| ConfigError::Invalid(format!("unknown log level '{level}'")))?,
            None => Level::INFO,
        };
        let log_format = if overrides.log_json || file.log_json.unwrap_or(false) {
            LogFormat::Json
        } else {
            LogFormat::Text
        };

        let defaults = BootSettings::default();
        let config = Config {
            bind: overrides.bind.or(file.bind).unwrap_or(DEFAULT_BIND),
            interface: overrides.interface.clone().or(file.interface),
            pool_begin,
            pool_end,
            boot: BootSettings {
                boot_filename: overrides
                    .boot_filename
                    .clone()
                    .or(file.boot_filename)
                    .unwrap_or(defaults.boot_filename),
                vendor_identifier: file
                    .vendor_identifier
                    .unwrap_or(defaults.vendor_identifier),
            },
            client_port: file.client_port.unwrap_or(DEFAULT_CLIENT_PORT),
            notify: overrides.notify.clone().or(file.notify),
            mgmt: overrides.mgmt.or(file.mgmt),
            log_level,
            log_format,
            path,
            overrides,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if u32::from(self.pool_begin) > u32::from(self.pool_end) {
            return Err(ConfigError::Invalid(format!(
                "pool_begin {} is after pool_end {}",
                self.pool_begin, self.pool_end
            )));
        }
        if self.boot.boot_filename.is_empty() {
            return Err(ConfigError::Invalid("boot filename is empty".into()));
        }
        if self.boot.boot_filename.len() > MAX_BOOT_FILENAME {
            return Err(ConfigError::Invalid(format!(
                "boot filename is {} bytes, at most {MAX_BOOT_FILENAME} fit in a DHCP packet",
                self.boot.boot_filename.len()
            )));
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn join_os(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

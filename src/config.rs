//! Configuration loading.
//!
//! Layered JSON: `debug_conf.json` if present (all other config files
//! ignored), else `global_conf.json` merged with an optional
//! `local_conf.json` overlay. `SX1301_conf` is a fixed interface boundary
//! the core never interprets, so it is kept as an opaque `serde_json::Value`
//! and passed through to the concentrator collaborator unchanged.

use crate::error::GatewayError;
use crate::protocol::GatewayEui;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_keepalive_interval() -> u32 {
    10
}

fn default_stat_interval() -> u32 {
    30
}

fn default_push_timeout_ms() -> u32 {
    100
}

fn default_port() -> u16 {
    1700
}

/// One configured server endpoint, from either the `servers` array or the
/// legacy single-server fallback triple.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConf {
    pub server_address: String,
    #[serde(default = "default_port")]
    pub serv_port_up: u16,
    #[serde(default = "default_port")]
    pub serv_port_down: u16,
    #[serde(default = "default_true")]
    pub serv_enabled: bool,
}

/// Recognised `gateway_conf` options.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConf {
    pub gateway_ID: String,

    #[serde(default)]
    pub servers: Option<Vec<ServerConf>>,
    // Legacy single-server fallback triple.
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub serv_port_up: Option<u16>,
    #[serde(default)]
    pub serv_port_down: Option<u16>,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u32,
    #[serde(default = "default_stat_interval")]
    pub stat_interval: u32,
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u32,

    #[serde(default = "default_true")]
    pub forward_crc_valid: bool,
    #[serde(default)]
    pub forward_crc_error: bool,
    #[serde(default)]
    pub forward_crc_disabled: bool,

    #[serde(default)]
    pub gps_tty_path: Option<String>,
    #[serde(default)]
    pub ref_latitude: f64,
    #[serde(default)]
    pub ref_longitude: f64,
    #[serde(default)]
    pub ref_altitude: i32,
    #[serde(default)]
    pub gps: bool,
    #[serde(default)]
    pub fake_gps: bool,

    #[serde(default = "default_beacon_period")]
    pub beacon_period: u32,
    #[serde(default)]
    pub beacon_offset: u32,
    #[serde(default = "default_beacon_freq_hz")]
    pub beacon_freq_hz: u64,

    #[serde(default = "default_true")]
    pub upstream: bool,
    #[serde(default = "default_true")]
    pub downstream: bool,
    #[serde(default)]
    pub ghoststream: bool,
    #[serde(default = "default_true")]
    pub radiostream: bool,
    #[serde(default = "default_true")]
    pub statusstream: bool,
    #[serde(default)]
    pub beacon: bool,
    #[serde(default)]
    pub monitor: bool,

    #[serde(default)]
    pub autoquit_threshold: u32,

    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub description: String,

    // Accepted but never acted on: monitor/ghost endpoints and
    // remote-shell capability are explicitly out of scope.
    #[serde(default)]
    pub monitor_address: Option<String>,
    #[serde(default)]
    pub ghost_address: Option<String>,
    #[serde(default)]
    pub system_calls: Option<Vec<String>>,
}

fn default_beacon_period() -> u32 {
    128
}

fn default_beacon_freq_hz() -> u64 {
    869_525_000
}

fn default_platform() -> String {
    "generic gateway".to_string()
}

impl GatewayConf {
    pub fn gateway_eui(&self) -> Result<GatewayEui, GatewayError> {
        GatewayEui::from_hex(&self.gateway_ID)
            .ok_or_else(|| GatewayError::Config(format!("invalid gateway_ID '{}'", self.gateway_ID)))
    }

    /// Resolve the configured server list, falling back to the legacy
    /// single-server triple when `servers` is absent.
    pub fn server_list(&self) -> Result<Vec<ServerConf>, GatewayError> {
        if let Some(servers) = &self.servers {
            return Ok(servers.clone());
        }
        if let Some(address) = &self.server_address {
            return Ok(vec![ServerConf {
                server_address: address.clone(),
                serv_port_up: self.serv_port_up.unwrap_or(default_port()),
                serv_port_down: self.serv_port_down.unwrap_or(default_port()),
                serv_enabled: true,
            }]);
        }
        Err(GatewayError::Config(
            "no servers configured (need 'servers' or 'server_address')".to_string(),
        ))
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "SX1301_conf", default)]
    pub sx1301_conf: Value,
    pub gateway_conf: GatewayConf,
}

/// Load configuration from `dir`, following the layering rule: `debug_conf.json`
/// if present, else `global_conf.json` merged with an optional
/// `local_conf.json` overlay.
pub fn load_config(dir: &Path) -> Result<Config, GatewayError> {
    let debug_path = dir.join("debug_conf.json");
    if debug_path.exists() {
        return load_json_file(&debug_path);
    }

    let global_path = dir.join("global_conf.json");
    let mut merged = read_json_file(&global_path)?;

    let local_path = dir.join("local_conf.json");
    if local_path.exists() {
        let local = read_json_file(&local_path)?;
        merge_json(&mut merged, local);
    }

    serde_json::from_value(merged)
        .map_err(|e| GatewayError::Config(format!("invalid configuration: {e}")))
}

fn load_json_file(path: &Path) -> Result<Config, GatewayError> {
    let value = read_json_file(path)?;
    serde_json::from_value(value).map_err(|e| GatewayError::Config(format!("invalid configuration: {e}")))
}

fn read_json_file(path: &Path) -> Result<Value, GatewayError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| GatewayError::Config(format!("cannot parse {}: {e}", path.display())))
}

/// Recursively overlay `overlay` onto `base`: object fields merge
/// key-by-key, anything else is replaced wholesale.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_json(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn sample_global() -> &'static str {
        r#"{
            "SX1301_conf": {"some_tuning": 1},
            "gateway_conf": {
                "gateway_ID": "AA555A0000000001",
                "server_address": "localhost",
                "serv_port_up": 1700,
                "serv_port_down": 1700,
                "stat_interval": 30
            }
        }"#
    }

    #[test]
    fn loads_global_conf_only() {
        let dir = tempdir();
        write_file(&dir, "global_conf.json", sample_global());
        let config = load_config(&dir).unwrap();
        assert_eq!(config.gateway_conf.stat_interval, 30);
        assert!(config.gateway_conf.upstream);
    }

    #[test]
    fn local_conf_overlays_global_conf() {
        let dir = tempdir();
        write_file(&dir, "global_conf.json", sample_global());
        write_file(
            &dir,
            "local_conf.json",
            r#"{"gateway_conf": {"stat_interval": 5, "platform": "my-gw"}}"#,
        );
        let config = load_config(&dir).unwrap();
        assert_eq!(config.gateway_conf.stat_interval, 5);
        assert_eq!(config.gateway_conf.platform, "my-gw");
        // Untouched field from global_conf survives the overlay.
        assert_eq!(
            config.gateway_conf.server_list().unwrap()[0].server_address,
            "localhost"
        );
    }

    #[test]
    fn debug_conf_overrides_everything_else() {
        let dir = tempdir();
        write_file(&dir, "global_conf.json", sample_global());
        write_file(
            &dir,
            "debug_conf.json",
            r#"{"gateway_conf": {"gateway_ID": "0000000000000000", "server_address": "debug-host"}}"#,
        );
        let config = load_config(&dir).unwrap();
        assert_eq!(
            config.gateway_conf.server_list().unwrap()[0].server_address,
            "debug-host"
        );
    }

    #[test]
    fn missing_config_is_fatal() {
        let dir = tempdir();
        let err = load_config(&dir).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn gateway_eui_parses_hex() {
        let dir = tempdir();
        write_file(&dir, "global_conf.json", sample_global());
        let config = load_config(&dir).unwrap();
        let eui = config.gateway_conf.gateway_eui().unwrap();
        assert_eq!(eui.to_hex(), "AA555A0000000001");
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lora-pkt-fwd-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

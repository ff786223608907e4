use anyhow::{anyhow, Result};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use gaugelink_core::controller::{
    DEFAULT_TEMP_POLL_RATIO, MIN_ECU_PROBE_INTERVAL, MIN_POLL_INTERVAL,
};
use gaugelink_core::{LinkConfig, LinkTarget, LinkTiming};
use log::{debug, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

const NVS_NAMESPACE: &str = "gaugelink";
const NVS_CONFIG_KEY: &str = "config";

// Global NVS handle - initialized once in main
static NVS: Mutex<Option<EspNvs<NvsDefault>>> = Mutex::new(None);

pub fn init_nvs(nvs_partition: EspNvsPartition<NvsDefault>) -> Result<()> {
    debug!("Initializing NVS namespace: {NVS_NAMESPACE}");
    let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;
    *NVS.lock().map_err(|_| anyhow!("NVS lock poisoned"))? = Some(nvs);
    info!("NVS initialized");
    Ok(())
}

/// OBD2 adapter identity on the BLE side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BleConfig {
    /// Name this device advertises as
    pub device_name: String,
    /// Adapter MAC address
    pub adapter_address: String,
    pub service_uuid: String,
    /// Characteristic commands are written to
    pub tx_uuid: String,
    /// Characteristic responses are notified on
    pub rx_uuid: String,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: "GAUGELINK".to_string(),
            adapter_address: "66:1e:32:7a:35:0e".to_string(),
            service_uuid: "0000fff0-0000-1000-8000-00805f9b34fb".to_string(),
            tx_uuid: "0000fff2-0000-1000-8000-00805f9b34fb".to_string(),
            rx_uuid: "0000fff1-0000-1000-8000-00805f9b34fb".to_string(),
        }
    }
}

/// 16x2 character LCD behind a PCF8574 I2C backpack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LcdConfig {
    /// 7-bit I2C address of the backpack
    #[serde(default = "default_lcd_address")]
    pub i2c_address: u8,
    #[serde(default = "default_sda_gpio")]
    pub sda_gpio: u8,
    #[serde(default = "default_scl_gpio")]
    pub scl_gpio: u8,
    #[serde(default = "default_baudrate_hz")]
    pub baudrate_hz: u32,
}

const fn default_lcd_address() -> u8 {
    0x27
}

const fn default_sda_gpio() -> u8 {
    21
}

const fn default_scl_gpio() -> u8 {
    22
}

const fn default_baudrate_hz() -> u32 {
    400_000
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self {
            i2c_address: default_lcd_address(),
            sda_gpio: default_sda_gpio(),
            scl_gpio: default_scl_gpio(),
            baudrate_hz: default_baudrate_hz(),
        }
    }
}

/// OBD2 polling behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObdConfig {
    /// Protocol number for ATSP (0 = automatic)
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Adapter response timeout for ATST, in units of 4 ms
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout: u8,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_init_command_delay_ms")]
    pub init_command_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_ecu_probe_interval_ms")]
    pub ecu_probe_interval_ms: u64,
    #[serde(default = "default_ecu_awake_banner_ms")]
    pub ecu_awake_banner_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// RPM polls per coolant temperature poll
    #[serde(default = "default_temp_poll_ratio")]
    pub temp_poll_ratio: u32,
    /// Unanswered ECU probes before reconnecting (0 = never)
    #[serde(default = "default_max_probe_timeouts")]
    pub max_probe_timeouts: u32,
}

fn default_protocol() -> String {
    "1".to_string()
}

const fn default_adapter_timeout() -> u8 {
    0x32
}

const fn default_command_timeout_ms() -> u64 {
    800
}

const fn default_init_timeout_ms() -> u64 {
    1500
}

const fn default_init_command_delay_ms() -> u64 {
    100
}

const fn default_reconnect_delay_ms() -> u64 {
    1000
}

const fn default_ecu_probe_interval_ms() -> u64 {
    500
}

const fn default_ecu_awake_banner_ms() -> u64 {
    1000
}

const fn default_poll_interval_ms() -> u64 {
    300
}

const fn default_temp_poll_ratio() -> u32 {
    DEFAULT_TEMP_POLL_RATIO
}

const fn default_max_probe_timeouts() -> u32 {
    10
}

impl Default for ObdConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            adapter_timeout: default_adapter_timeout(),
            command_timeout_ms: default_command_timeout_ms(),
            init_timeout_ms: default_init_timeout_ms(),
            init_command_delay_ms: default_init_command_delay_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ecu_probe_interval_ms: default_ecu_probe_interval_ms(),
            ecu_awake_banner_ms: default_ecu_awake_banner_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            temp_poll_ratio: default_temp_poll_ratio(),
            max_probe_timeouts: default_max_probe_timeouts(),
        }
    }
}

/// Longest single wait the link task may block for, well inside the
/// task watchdog timeout
pub const MAX_WAIT_MS: u64 = 5000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub lcd: LcdConfig,
    #[serde(default)]
    pub obd: ObdConfig,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn clamp_wait(name: &str, value: &mut u64) {
    if *value > MAX_WAIT_MS {
        warn!("Clamping {name} from {value} to {MAX_WAIT_MS}");
        *value = MAX_WAIT_MS;
    }
}

fn floor_wait(name: &str, value: &mut u64, min: Duration) {
    let min_ms = u64::try_from(min.as_millis()).unwrap_or(MAX_WAIT_MS);
    if *value < min_ms {
        warn!("Raising {name} from {value} to {min_ms}");
        *value = min_ms;
    }
}

impl Config {
    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        let obd = &mut self.obd;
        clamp_wait("command_timeout_ms", &mut obd.command_timeout_ms);
        clamp_wait("init_timeout_ms", &mut obd.init_timeout_ms);
        clamp_wait("init_command_delay_ms", &mut obd.init_command_delay_ms);
        clamp_wait("reconnect_delay_ms", &mut obd.reconnect_delay_ms);
        clamp_wait("ecu_probe_interval_ms", &mut obd.ecu_probe_interval_ms);
        clamp_wait("ecu_awake_banner_ms", &mut obd.ecu_awake_banner_ms);
        clamp_wait("poll_interval_ms", &mut obd.poll_interval_ms);
        floor_wait(
            "ecu_probe_interval_ms",
            &mut obd.ecu_probe_interval_ms,
            MIN_ECU_PROBE_INTERVAL,
        );
        floor_wait("poll_interval_ms", &mut obd.poll_interval_ms, MIN_POLL_INTERVAL);

        if obd.temp_poll_ratio == 0 {
            warn!("temp_poll_ratio must be at least 1, resetting to default");
            obd.temp_poll_ratio = default_temp_poll_ratio();
        }
        let protocol_ok = obd.protocol.len() == 1
            && obd
                .protocol
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='C').contains(&c));
        if !protocol_ok {
            warn!("Invalid OBD protocol {:?}, resetting to default", obd.protocol);
            obd.protocol = default_protocol();
        }

        if self.ble.adapter_address.is_empty() {
            warn!("Adapter address is empty, resetting to default");
            self.ble.adapter_address = BleConfig::default().adapter_address;
        }
        if self.ble.device_name.is_empty() {
            warn!("Device name is empty, resetting to default");
            self.ble.device_name = BleConfig::default().device_name;
        }
        if self.lcd.i2c_address > 0x7F {
            warn!("LCD I2C address {:#04x} is not 7-bit, resetting to default", self.lcd.i2c_address);
            self.lcd.i2c_address = default_lcd_address();
        }
    }

    /// Settings the link controller runs with
    pub fn link_config(&self) -> LinkConfig {
        let obd = &self.obd;
        LinkConfig {
            target: LinkTarget {
                address: self.ble.adapter_address.clone(),
                service_uuid: self.ble.service_uuid.clone(),
                tx_uuid: self.ble.tx_uuid.clone(),
                rx_uuid: self.ble.rx_uuid.clone(),
            },
            timing: LinkTiming {
                command_timeout: Duration::from_millis(obd.command_timeout_ms),
                init_timeout: Duration::from_millis(obd.init_timeout_ms),
                init_command_delay: Duration::from_millis(obd.init_command_delay_ms),
                reconnect_delay: Duration::from_millis(obd.reconnect_delay_ms),
                ecu_probe_interval: Duration::from_millis(obd.ecu_probe_interval_ms),
                ecu_awake_banner: Duration::from_millis(obd.ecu_awake_banner_ms),
                poll_interval: Duration::from_millis(obd.poll_interval_ms),
            }
            .enforce_pacing(),
            protocol: obd.protocol.clone(),
            adapter_timeout: obd.adapter_timeout,
            temp_poll_ratio: obd.temp_poll_ratio,
            max_probe_timeouts: obd.max_probe_timeouts,
        }
    }

    /// Load the stored config, or store and return the defaults on first boot
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(Some(mut config)) => {
                info!("Loaded config from NVS");
                config.validate();
                config
            }
            Ok(None) => {
                info!("No config in NVS, storing defaults");
                let config = Self::default();
                if let Err(e) = config.save() {
                    warn!("Failed to store default config: {e}");
                }
                config
            }
            Err(e) => {
                warn!("Failed to load config from NVS: {e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn load() -> Result<Option<Self>> {
        debug!("Loading config from NVS");
        let nvs_guard = NVS.lock().map_err(|_| anyhow!("NVS lock poisoned"))?;
        let nvs = nvs_guard.as_ref().ok_or_else(|| anyhow!("NVS not initialized"))?;

        let Some(len) = nvs.blob_len(NVS_CONFIG_KEY)? else {
            return Ok(None);
        };
        debug!("Config blob size: {len} bytes");
        let mut buf = vec![0u8; len];
        nvs.get_blob(NVS_CONFIG_KEY, &mut buf)?;
        let config: Config = serde_json::from_slice(&buf)?;
        debug!(
            "Config parsed: adapter={:?}, log_level={:?}",
            config.ble.adapter_address, config.log_level
        );
        Ok(Some(config))
    }

    pub fn save(&self) -> Result<()> {
        debug!("Saving config to NVS");
        let mut nvs_guard = NVS.lock().map_err(|_| anyhow!("NVS lock poisoned"))?;
        let nvs = nvs_guard.as_mut().ok_or_else(|| anyhow!("NVS not initialized"))?;

        let json = serde_json::to_vec(self)?;
        debug!("Config JSON size: {} bytes", json.len());
        nvs.set_blob(NVS_CONFIG_KEY, &json)?;
        info!("Config saved to NVS");
        Ok(())
    }
}


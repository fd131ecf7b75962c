use anyhow::{Context, ensure};
use chrono::TimeDelta;
use serde::Deserialize;

use crate::domain::energy::{BatterySpec, EnergyModel, EnergyProfile};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub viewer: ViewerSettings,
    pub demo: DemoSettings,
    pub energy: EnergySettings,
    pub battery: BatterySettings,
    pub history: HistorySettings,
    pub logging: LoggingSettings,
}

/// Longest accepted timer or gate interval: one week.
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl RelayConfig {
    /// Rejects values the generator, metrics or timers cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let demo = &self.demo;
        ensure!(
            demo.voltage_min.is_finite() && demo.voltage_max.is_finite(),
            "demo voltage band must be finite"
        );
        ensure!(
            demo.voltage_min <= demo.voltage_max,
            "demo.voltage_min ({}) is above demo.voltage_max ({})",
            demo.voltage_min,
            demo.voltage_max
        );
        ensure!(demo.initial_voltage.is_finite(), "demo.initial_voltage must be finite");
        ensure!(
            demo.voltage_step.is_finite() && demo.voltage_step >= 0.0,
            "demo.voltage_step must be a non-negative number, got {}",
            demo.voltage_step
        );
        ensure!(
            (0.0..=1.0).contains(&demo.event_probability),
            "demo.event_probability must be within [0, 1], got {}",
            demo.event_probability
        );
        ensure!(
            demo.energy_gain_min.is_finite()
                && demo.energy_gain_max.is_finite()
                && 0.0 <= demo.energy_gain_min
                && demo.energy_gain_min <= demo.energy_gain_max,
            "demo energy gain band [{}, {}] must be finite, non-negative and ordered",
            demo.energy_gain_min,
            demo.energy_gain_max
        );
        ensure!(
            demo.energy_drain.is_finite() && demo.energy_drain >= 0.0,
            "demo.energy_drain must be a non-negative number, got {}",
            demo.energy_drain
        );

        let energy = &self.energy;
        ensure!(
            energy.capacitance_farads.is_finite() && energy.capacitance_farads > 0.0,
            "energy.capacitance_farads must be positive, got {}",
            energy.capacitance_farads
        );
        ensure!(
            energy.runtime_seconds_per_joule.is_finite() && energy.runtime_seconds_per_joule >= 0.0,
            "energy.runtime_seconds_per_joule must be a non-negative number, got {}",
            energy.runtime_seconds_per_joule
        );

        let battery = &self.battery;
        ensure!(
            battery.capacity_mah.is_finite() && battery.capacity_mah > 0.0,
            "battery.capacity_mah must be positive, got {}",
            battery.capacity_mah
        );
        ensure!(
            battery.nominal_voltage.is_finite() && battery.nominal_voltage > 0.0,
            "battery.nominal_voltage must be positive, got {}",
            battery.nominal_voltage
        );

        for (key, size) in [
            ("history.short_capacity", self.history.short_capacity),
            ("history.long_capacity", self.history.long_capacity),
            ("viewer.outbound_queue", self.viewer.outbound_queue),
        ] {
            ensure!(size > 0, "{key} must be at least 1");
        }

        for (key, secs) in [
            ("demo.tick_secs", demo.tick_secs),
            ("device.liveness_timeout_secs", self.device.liveness_timeout_secs),
            ("device.sweep_interval_secs", self.device.sweep_interval_secs),
            ("history.long_interval_secs", self.history.long_interval_secs),
        ] {
            ensure!(
                (1..=MAX_INTERVAL_SECS).contains(&secs),
                "{key} must be between 1 and {MAX_INTERVAL_SECS} seconds, got {secs}"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceSettings {
    /// Value of the `x-client-type` header that marks a device connection.
    pub client_type: String,
    /// Substring of `user-agent` that marks a device connection.
    pub user_agent_token: String,
    pub liveness_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            client_type: "esp8266".to_string(),
            user_agent_token: "ESP8266".to_string(),
            liveness_timeout_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

impl DeviceSettings {
    pub fn liveness_timeout(&self) -> TimeDelta {
        seconds(self.liveness_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViewerSettings {
    /// Messages queued per viewer before further sends to it are dropped.
    pub outbound_queue: usize,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self { outbound_queue: 64 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DemoSettings {
    pub enabled: bool,
    pub tick_secs: u64,
    pub initial_voltage: f64,
    pub voltage_min: f64,
    pub voltage_max: f64,
    /// Width of the uniform voltage step, centred on zero.
    pub voltage_step: f64,
    pub event_probability: f64,
    pub energy_gain_min: f64,
    pub energy_gain_max: f64,
    pub energy_drain: f64,
    /// Fixed RNG seed; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 2,
            initial_voltage: 3.2,
            voltage_min: 2.8,
            voltage_max: 3.6,
            voltage_step: 0.2,
            event_probability: 0.2,
            energy_gain_min: 0.0008,
            energy_gain_max: 0.002,
            energy_drain: 0.0001,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnergySettings {
    pub model: EnergyModel,
    pub capacitance_farads: f64,
    pub runtime_seconds_per_joule: f64,
}

impl Default for EnergySettings {
    fn default() -> Self {
        Self {
            model: EnergyModel::Accumulating,
            capacitance_farads: 0.00047,
            runtime_seconds_per_joule: 4000.0,
        }
    }
}

impl EnergySettings {
    pub fn profile(&self) -> EnergyProfile {
        EnergyProfile {
            model: self.model,
            capacitance_farads: self.capacitance_farads,
            runtime_seconds_per_joule: self.runtime_seconds_per_joule,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatterySettings {
    pub capacity_mah: f64,
    pub nominal_voltage: f64,
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            capacity_mah: 4800.0,
            nominal_voltage: 3.7,
        }
    }
}

impl BatterySettings {
    pub fn spec(&self) -> BatterySpec {
        BatterySpec {
            capacity_mah: self.capacity_mah,
            nominal_voltage: self.nominal_voltage,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistorySettings {
    pub short_capacity: usize,
    pub long_capacity: usize,
    pub long_interval_secs: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            short_capacity: 50,
            long_capacity: 288,
            long_interval_secs: 5 * 60,
        }
    }
}

impl HistorySettings {
    pub fn long_interval(&self) -> TimeDelta {
        seconds(self.long_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Layered load: optional `config/relay.*` file, `RELAY__SECTION__KEY`
/// environment variables, then `PORT`.
pub fn load_relay_config() -> anyhow::Result<RelayConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/relay").required(false))
        .add_source(
            config::Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("server.port", std::env::var("PORT").ok())?;

    let config: RelayConfig = builder.build()?.try_deserialize()?;
    config.validate().context("invalid relay configuration")?;
    Ok(config)
}

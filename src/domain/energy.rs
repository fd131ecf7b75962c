// Energy models - how a reading's stored energy is derived
use serde::Deserialize;

/// Strategy for deriving the `energy` of a synthesized reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyModel {
    /// Energy carries over between readings: event gains add, a small drain subtracts.
    #[default]
    Accumulating,
    /// Energy is recomputed from the current voltage each tick as ½·C·V².
    CapacitiveInstantaneous,
}

/// Energy stored in a capacitor charged to `voltage`.
pub fn capacitor_energy(capacitance_farads: f64, voltage: f64) -> f64 {
    0.5 * capacitance_farads * voltage * voltage
}

/// Physical constants shared by the demo generator and the device decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyProfile {
    pub model: EnergyModel,
    pub capacitance_farads: f64,
    pub runtime_seconds_per_joule: f64,
}

impl EnergyProfile {
    pub fn stored_energy(&self, voltage: f64) -> f64 {
        capacitor_energy(self.capacitance_farads, voltage)
    }

    pub fn estimated_runtime(&self, energy: f64) -> f64 {
        energy.max(0.0) * self.runtime_seconds_per_joule
    }
}

/// Nominal battery used to normalize accumulated energy into a charge fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySpec {
    pub capacity_mah: f64,
    pub nominal_voltage: f64,
}

impl BatterySpec {
    /// Capacity in joules: V × Ah × 3600.
    pub fn energy_capacity_joules(&self) -> f64 {
        self.nominal_voltage * self.capacity_mah / 1000.0 * 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacitor_energy() {
        let e = capacitor_energy(0.001, 3.0);
        assert!((e - 0.0045).abs() < 1e-12);
        assert_eq!(capacitor_energy(0.001, 0.0), 0.0);
    }

    #[test]
    fn test_battery_capacity() {
        let battery = BatterySpec {
            capacity_mah: 4800.0,
            nominal_voltage: 3.7,
        };
        assert!((battery.energy_capacity_joules() - 63_936.0).abs() < 1e-6);
    }

    #[test]
    fn test_model_names() {
        let model: EnergyModel = serde_json::from_str("\"capacitive-instantaneous\"").unwrap();
        assert_eq!(model, EnergyModel::CapacitiveInstantaneous);
        let model: EnergyModel = serde_json::from_str("\"accumulating\"").unwrap();
        assert_eq!(model, EnergyModel::Accumulating);
    }

    #[test]
    fn test_runtime_never_negative() {
        let profile = EnergyProfile {
            model: EnergyModel::Accumulating,
            capacitance_farads: 0.00047,
            runtime_seconds_per_joule: 4000.0,
        };
        assert_eq!(profile.estimated_runtime(-1.0), 0.0);
        assert!((profile.estimated_runtime(0.01) - 40.0).abs() < 1e-9);
    }
}

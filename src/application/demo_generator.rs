// Demo data generator - Synthetic readings while no device is attached
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::energy::{EnergyModel, EnergyProfile};
use crate::domain::reading::{Mode, Reading};
use crate::infrastructure::config::DemoSettings;

/// Bounded random walk over voltage with occasional trigger events. Keeps its
/// own last reading, so it resumes where it stopped when demo mode returns.
#[derive(Debug, Clone)]
pub struct DemoGenerator {
    settings: DemoSettings,
    profile: EnergyProfile,
    rng: StdRng,
    last: Reading,
}

impl DemoGenerator {
    pub fn new(settings: DemoSettings, profile: EnergyProfile) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(settings, profile, rng)
    }

    pub fn with_rng(settings: DemoSettings, profile: EnergyProfile, rng: StdRng) -> Self {
        let voltage = within_band(settings.initial_voltage, &settings);
        let energy = match profile.model {
            EnergyModel::Accumulating => 0.0,
            EnergyModel::CapacitiveInstantaneous => profile.stored_energy(voltage),
        };
        let last = Reading::new(voltage, 0, energy, profile.estimated_runtime(energy), Mode::Demo);
        Self {
            settings,
            profile,
            rng,
            last,
        }
    }

    pub fn last(&self) -> &Reading {
        &self.last
    }

    /// Advance one tick and return the new reading.
    pub fn next_reading(&mut self) -> Reading {
        let s = &self.settings;
        let mut next = self.last.clone();

        let step = (self.rng.random::<f64>() - 0.5) * s.voltage_step;
        next.voltage = within_band(next.voltage + step, s);

        let mut gain = 0.0;
        if self.rng.random_bool(event_probability(s)) {
            next.event_count += 1;
            gain = s.energy_gain_min + self.rng.random::<f64>() * (s.energy_gain_max - s.energy_gain_min);
        }

        next.energy = match self.profile.model {
            EnergyModel::Accumulating => (next.energy + gain - s.energy_drain).max(0.0),
            EnergyModel::CapacitiveInstantaneous => self.profile.stored_energy(next.voltage),
        };
        next.estimated_runtime = self.profile.estimated_runtime(next.energy);
        next.mode = Mode::Demo;

        self.last = next.clone();
        next
    }
}

// `f64::clamp` panics on an inverted band; an inverted band pins to the max.
fn within_band(voltage: f64, s: &DemoSettings) -> f64 {
    voltage.max(s.voltage_min).min(s.voltage_max)
}

fn event_probability(s: &DemoSettings) -> f64 {
    if s.event_probability.is_nan() {
        0.0
    } else {
        s.event_probability.clamp(0.0, 1.0)
    }
}

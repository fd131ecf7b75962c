// Mode controller - Live/demo state machine
use super::reading::Mode;

/// State change the owner of the statistics must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEffect {
    None,
    /// Cold start into live: zero accumulated and current energy.
    ClearEnergy,
    /// Clean slate: aggregates and both history buffers.
    FullReset,
}

#[derive(Debug, Clone, Default)]
pub struct ModeController {
    mode: Mode,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == Mode::Live
    }

    /// A device session was registered.
    pub fn device_registered(&mut self) -> ModeEffect {
        let effect = if self.is_live() {
            ModeEffect::None
        } else {
            ModeEffect::ClearEnergy
        };
        self.mode = Mode::Live;
        effect
    }

    /// The device closed, errored or timed out. Demo resumes from whatever the
    /// generator last produced, so nothing is reset.
    pub fn device_lost(&mut self) -> ModeEffect {
        self.mode = Mode::Demo;
        ModeEffect::None
    }

    /// A viewer asked for `requested`. Returns the effect; the resulting mode
    /// is available through [`ModeController::mode`].
    pub fn viewer_requested(&mut self, requested: Mode, device_present: bool) -> ModeEffect {
        match (requested, device_present) {
            (Mode::Live, false) => {
                self.mode = Mode::Live;
                ModeEffect::FullReset
            }
            (Mode::Live, true) => {
                self.mode = Mode::Live;
                ModeEffect::None
            }
            (Mode::Demo, _) => {
                self.mode = Mode::Demo;
                ModeEffect::None
            }
        }
    }
}

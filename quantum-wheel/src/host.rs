//! Host framework interface for wheel property updates.

use strum::{Display, EnumIter};
use tracing::{info, warn};

use crate::wheel::Setting;

/// Properties the wheel driver publishes to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum PropertyKind {
    /// Duration of the last filter switch.
    #[strum(serialize = "FILTER_SWITCH_DURATION")]
    SwitchDuration,
    /// Device-reported precision of the last filter switch.
    #[strum(serialize = "FILTER_SWITCH_PRECISION")]
    SwitchPrecision,
    /// Dynamically discovered device settings.
    #[strum(serialize = "SETTINGS")]
    Settings,
}

/// Status attached to a published property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

/// New contents for a published property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyUpdate {
    SwitchDuration { millis: u64 },
    SwitchPrecision { precision: f64 },
    Settings {
        settings: Vec<Setting>,
        state: PropertyState,
    },
}

impl PropertyUpdate {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyUpdate::SwitchDuration { .. } => PropertyKind::SwitchDuration,
            PropertyUpdate::SwitchPrecision { .. } => PropertyKind::SwitchPrecision,
            PropertyUpdate::Settings { .. } => PropertyKind::Settings,
        }
    }
}

/// Interface the wheel driver calls into its host.
///
/// Abstracts the device framework (property publication, client messages)
/// so the protocol engine can be driven from a CLI, a device server, or tests.
pub trait WheelHost {
    /// Define or update a property.
    fn publish(&mut self, update: PropertyUpdate);

    /// Remove a property from the host.
    fn withdraw(&mut self, property: PropertyKind);

    /// A move finished; `position` is the 1-based slot now in the beam.
    fn move_complete(&mut self, position: u8);

    /// Diagnostic text for the user.
    fn message(&mut self, text: &str);
}

impl<H: WheelHost + ?Sized> WheelHost for &mut H {
    fn publish(&mut self, update: PropertyUpdate) {
        (**self).publish(update)
    }

    fn withdraw(&mut self, property: PropertyKind) {
        (**self).withdraw(property)
    }

    fn move_complete(&mut self, position: u8) {
        (**self).move_complete(position)
    }

    fn message(&mut self, text: &str) {
        (**self).message(text)
    }
}

/// Host that reports everything through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHost;

impl WheelHost for LogHost {
    fn publish(&mut self, update: PropertyUpdate) {
        match update {
            PropertyUpdate::SwitchDuration { millis } => {
                info!("{}: {} ms", PropertyKind::SwitchDuration, millis)
            }
            PropertyUpdate::SwitchPrecision { precision } => {
                info!("{}: {:.2}", PropertyKind::SwitchPrecision, precision)
            }
            PropertyUpdate::Settings { settings, state } => {
                info!("{} [{}]", PropertyKind::Settings, state);
                for setting in settings {
                    info!("  {}", setting);
                }
            }
        }
    }

    fn withdraw(&mut self, property: PropertyKind) {
        info!("{} withdrawn", property);
    }

    fn move_complete(&mut self, position: u8) {
        info!("Filter {} in place", position);
    }

    fn message(&mut self, text: &str) {
        warn!("{}", text);
    }
}

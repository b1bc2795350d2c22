//! Cache of device-resident settings discovered on extended wheels.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{WheelError, WheelResult};

/// Smallest value the wheel accepts for any setting.
pub const SETTING_MIN: f64 = 0.0;

/// Largest value the wheel accepts for any setting.
pub const SETTING_MAX: f64 = 100.0;

/// One tunable numeric parameter exposed by the wheel.
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    /// Single printable ASCII identifier used on the wire.
    pub id: char,
    pub description: String,
    pub value: f64,
}

impl Setting {
    pub fn new(id: char, description: impl Into<String>, value: f64) -> Self {
        Self {
            id,
            description: description.into(),
            value,
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {} ({})", self.id, self.value, self.description)
    }
}

/// Discovered settings keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    settings: BTreeMap<char, Setting>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting. Returns `false` and leaves the store untouched if the
    /// identifier is already present.
    pub fn insert(&mut self, setting: Setting) -> bool {
        if self.settings.contains_key(&setting.id) {
            return false;
        }
        self.settings.insert(setting.id, setting);
        true
    }

    pub fn get(&self, id: char) -> Option<&Setting> {
        self.settings.get(&id)
    }

    pub fn contains(&self, id: char) -> bool {
        self.settings.contains_key(&id)
    }

    pub fn value(&self, id: char) -> Option<f64> {
        self.settings.get(&id).map(|s| s.value)
    }

    /// Replace the cached value, returning the previous one.
    pub fn set_value(&mut self, id: char, value: f64) -> Option<f64> {
        self.settings
            .get_mut(&id)
            .map(|s| std::mem::replace(&mut s.value, value))
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn clear(&mut self) {
        self.settings.clear();
    }

    /// Settings in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.values()
    }

    pub fn snapshot(&self) -> Vec<Setting> {
        self.settings.values().cloned().collect()
    }

    /// Check a whole batch before anything is written.
    ///
    /// Fails on the first unknown identifier or out-of-range value.
    pub fn validate_batch(&self, updates: &[(char, f64)]) -> WheelResult<()> {
        for &(id, value) in updates {
            if !self.contains(id) {
                return Err(WheelError::UnknownSetting(id));
            }
            if !(SETTING_MIN..=SETTING_MAX).contains(&value) {
                return Err(WheelError::SettingValueOutOfRange {
                    id,
                    value,
                    min: SETTING_MIN,
                    max: SETTING_MAX,
                });
            }
        }
        Ok(())
    }
}

/// Outcome of a settings batch.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    /// Identifiers written and acknowledged, in request order.
    pub applied: Vec<char>,
    /// Identifiers skipped because the cache already held the value.
    pub unchanged: Vec<char>,
    /// Identifiers whose write failed; their cache entry was rolled back.
    pub failed: Vec<(char, WheelError)>,
}

impl UpdateSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} unchanged, {} failed",
            self.applied.len(),
            self.unchanged.len(),
            self.failed.len()
        )
    }
}

//! Quantum filter wheel driver.
//!
//! [`QuantumWheel`] owns the link to one wheel and runs every protocol
//! operation to completion before returning: identity handshake, settings
//! discovery, filter moves with confirmation, and settings updates.
//!
//! # Moves
//!
//! A move sends `G<pos>` and then reads lines, sleeping the configured poll
//! interval before each read, until the wheel echoes `P<pos>`. Lines that are
//! not the expected marker are ignored. A reply carrying `:E<text>` fails the
//! move; `:<number>` reports the precision of the move.
//!
//! Every read is bounded by the per-read timeout. The poll loop itself has no
//! bound unless [`WheelConfig::move_deadline_secs`] is set.
//!
//! # Settings
//!
//! Wheels whose identity reply carries a `+` expose numeric settings. They are
//! enumerated once at connect time and cached in a [`SettingsStore`]. Updates
//! are diffed against the cache so only changed values go over the wire.
//!
//! # Example
//!
//! ```no_run
//! use quantum_wheel::{open_transport, LogHost, QuantumWheel, WheelConfig};
//!
//! let config = WheelConfig::default();
//! let transport = open_transport(&config.connection)?;
//! let mut wheel = QuantumWheel::connect(transport, LogHost, config)?;
//!
//! wheel.select_filter(3)?;
//! let stats = wheel.statistics();
//! println!("Moved in {} ms, precision {}", stats.duration_ms, stats.precision);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod settings;

pub use settings::{Setting, SettingsStore, UpdateSummary, SETTING_MAX, SETTING_MIN};

use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::config::{ConfigError, WheelConfig};
use crate::error::{WheelError, WheelResult};
use crate::host::{PropertyKind, PropertyState, PropertyUpdate, WheelHost};
use crate::link::Link;
use crate::protocol::{
    self, parse_filter_count, parse_filter_name, parse_filter_offset, parse_identity,
    parse_move_reply, parse_setting_description, parse_setting_value, parse_settings_list,
    parse_version, Command, DeviceIdentity, MoveReply, MAX_NAME_LEN, PRECISION_WORST,
};
use crate::transport::Transport;

/// Duration reported for a move in simulation mode.
pub const SIMULATED_SWITCH_MS: u64 = 100;

/// Statistics of the most recent filter switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchStatistics {
    /// Wall-clock time from sending the move to its confirmation.
    pub duration_ms: u64,
    /// Device-reported precision, [`PRECISION_WORST`] when not reported.
    pub precision: f64,
}

impl Default for SwitchStatistics {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            precision: PRECISION_WORST,
        }
    }
}

/// Driver for one Quantum filter wheel.
///
/// Positions in this API are 1-based, `1..=filter_count`. Callers must
/// serialize access; every operation takes `&mut self`.
pub struct QuantumWheel<T: Transport, H: WheelHost> {
    link: Option<Link<T>>,
    host: H,
    config: WheelConfig,
    identity: DeviceIdentity,
    settings: SettingsStore,
    current_filter: u8,
    statistics: SwitchStatistics,
    simulation: bool,
}

impl<T: Transport, H: WheelHost> QuantumWheel<T, H> {
    /// Handshake with the wheel behind `transport` and discover its settings.
    ///
    /// Fails if the wheel does not answer the identity query, or if an
    /// extended wheel does not answer the settings listing. Individual
    /// settings that cannot be read are skipped.
    ///
    /// With `config.simulation` set no I/O is performed. An invalid
    /// `config` fails with [`WheelError::InvalidConfig`] before any I/O.
    pub fn connect(transport: T, mut host: H, config: WheelConfig) -> WheelResult<Self> {
        if let Err(e) = check_config(&config) {
            host.message(&e.to_string());
            return Err(e);
        }
        let link = Link::new(transport, config.read_timeout());
        let mut wheel = Self::build(Some(link), host, config);

        let result = wheel.handshake();
        wheel.report(result)?;
        Ok(wheel)
    }

    /// A wheel with no link, running in simulation mode.
    pub fn simulated(mut host: H, config: WheelConfig) -> WheelResult<Self> {
        if let Err(e) = check_config(&config) {
            host.message(&e.to_string());
            return Err(e);
        }
        let mut wheel = Self::build(None, host, config);
        wheel.simulation = true;
        wheel.handshake_simulated();
        Ok(wheel)
    }

    fn build(link: Option<Link<T>>, host: H, config: WheelConfig) -> Self {
        let simulation = config.simulation;
        let mut wheel = Self {
            link,
            host,
            config,
            identity: DeviceIdentity::default(),
            settings: SettingsStore::new(),
            current_filter: 1,
            statistics: SwitchStatistics::default(),
            simulation,
        };
        wheel.publish_statistics();
        wheel
    }

    // ==================== Handshake / Discovery ====================

    fn handshake(&mut self) -> WheelResult<()> {
        if self.simulation {
            self.handshake_simulated();
            return Ok(());
        }

        let reply = self.link()?.exchange(&Command::Identity)?;
        let identity = parse_identity(&reply)?;
        info!(
            "Quantum wheel SN{} ({})",
            identity.details,
            if identity.extended { "extended" } else { "standard" }
        );
        self.identity = identity;

        self.settings.clear();
        if self.identity.extended {
            self.discover_settings()?;
        }
        self.publish_settings(PropertyState::Ok);
        Ok(())
    }

    fn handshake_simulated(&mut self) {
        info!("Simulation: wheel connected");
        self.identity = DeviceIdentity {
            quantum: true,
            extended: false,
            details: "simulation".to_string(),
        };
        self.settings.clear();
        self.publish_settings(PropertyState::Idle);
    }

    fn discover_settings(&mut self) -> WheelResult<()> {
        let reply = self.link()?.exchange(&Command::ListSettings)?;
        let ids = parse_settings_list(&reply, self.config.max_settings)?;
        debug!("Wheel lists {} settings: {:?}", ids.len(), ids);

        for id in ids {
            match self.probe_setting(id) {
                Ok(setting) => {
                    debug!("Discovered setting {}", setting);
                    self.settings.insert(setting);
                }
                Err(e) => warn!("Skipping setting '{}': {}", id, e),
            }
        }
        Ok(())
    }

    fn probe_setting(&mut self, id: char) -> WheelResult<Setting> {
        let link = self.link()?;
        let reply = link.exchange(&Command::ReadSetting(id))?;
        let value = parse_setting_value(&reply, id)?;
        let reply = link.exchange(&Command::DescribeSetting(id))?;
        let description = parse_setting_description(&reply, id)?;
        Ok(Setting::new(id, description, value))
    }

    // ==================== Filter Selection ====================

    /// Move to the 1-based `position` and wait for the wheel to confirm.
    ///
    /// Out-of-range positions fail with [`WheelError::OutOfRangePosition`]
    /// before any I/O. On success the current filter and switch statistics
    /// are updated and the host is told the move completed.
    pub fn select_filter(&mut self, position: i32) -> WheelResult<()> {
        let result = self.move_to(position);
        self.report(result)
    }

    fn move_to(&mut self, position: i32) -> WheelResult<()> {
        let target = self.wire_position(position)?;

        if self.simulation {
            debug!("Simulation: moving to filter {}", position);
            self.finish_move(target, PRECISION_WORST, SIMULATED_SWITCH_MS);
            return Ok(());
        }

        let poll_interval = self.config.poll_interval();
        let deadline = self.config.move_deadline();
        let link = self.link()?;

        link.discard_input()?;
        link.send(&Command::Move(target))?;
        let start = Instant::now();

        let precision = loop {
            std::thread::sleep(poll_interval);
            let status = match link.read_reply() {
                Ok(reply) => {
                    trace!("Waiting for P{}, got <{}>", target, reply);
                    parse_move_reply(&reply, target)
                }
                // A frame that filled the read bound without a line end.
                Err(WheelError::UnexpectedReply { actual, .. }) => {
                    warn!("Ignoring unterminated line <{}> while moving", actual);
                    MoveReply::Pending
                }
                Err(e) => return Err(e),
            };

            match status {
                MoveReply::Arrived { precision } => break precision,
                MoveReply::Failed(diagnostic) => {
                    error!("Error reported by device: {}", diagnostic);
                    return Err(WheelError::DeviceReportedError(diagnostic));
                }
                MoveReply::Pending => {
                    if let Some(limit) = deadline {
                        if start.elapsed() > limit {
                            return Err(WheelError::MoveDeadlineExceeded(limit));
                        }
                    }
                }
            }
        };

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match precision {
            Some(p) => debug!("Move to filter {} took {} ms, precision {}", position, duration_ms, p),
            None => debug!("Move to filter {} took {} ms", position, duration_ms),
        }
        self.finish_move(target, precision.unwrap_or(PRECISION_WORST), duration_ms);
        Ok(())
    }

    fn finish_move(&mut self, target: u8, precision: f64, duration_ms: u64) {
        self.update_statistics(precision, duration_ms);
        self.current_filter = target + 1;
        self.host.move_complete(self.current_filter);
    }

    /// 1-based filter currently in the beam.
    pub fn query_filter(&self) -> u8 {
        self.current_filter
    }

    /// Duration and precision of the last completed switch.
    pub fn statistics(&self) -> SwitchStatistics {
        self.statistics
    }

    fn update_statistics(&mut self, precision: f64, duration_ms: u64) {
        if self.statistics.precision != precision {
            self.statistics.precision = precision;
            self.host.publish(PropertyUpdate::SwitchPrecision { precision });
        }
        if self.statistics.duration_ms != duration_ms {
            self.statistics.duration_ms = duration_ms;
            self.host.publish(PropertyUpdate::SwitchDuration {
                millis: duration_ms,
            });
        }
    }

    fn publish_statistics(&mut self) {
        self.host.publish(PropertyUpdate::SwitchDuration {
            millis: self.statistics.duration_ms,
        });
        self.host.publish(PropertyUpdate::SwitchPrecision {
            precision: self.statistics.precision,
        });
    }

    // ==================== Settings ====================

    /// Settings discovered at connect time, with their cached values.
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Push changed setting values to the wheel.
    ///
    /// The whole batch is rejected before any write if it names an unknown
    /// setting or a value outside [`SETTING_MIN`]..=[`SETTING_MAX`]. Values
    /// equal to the cache are skipped. The rest are written in the given
    /// order; a failed write rolls back only its own cache entry and is
    /// recorded in [`UpdateSummary::failed`].
    pub fn apply_setting_updates(&mut self, updates: &[(char, f64)]) -> WheelResult<UpdateSummary> {
        let result = self.write_settings(updates);
        self.report(result)
    }

    fn write_settings(&mut self, updates: &[(char, f64)]) -> WheelResult<UpdateSummary> {
        self.settings.validate_batch(updates)?;

        let mut summary = UpdateSummary::default();
        for &(id, value) in updates {
            let Some(previous) = self.settings.set_value(id, value) else {
                return Err(WheelError::UnknownSetting(id));
            };
            if previous == value {
                info!("Setting '{}' already {}, not sent", id, value);
                summary.unchanged.push(id);
                continue;
            }

            match self.write_setting(id, value) {
                Ok(acknowledged) => {
                    debug!("Setting '{}' = {}", id, acknowledged);
                    self.settings.set_value(id, acknowledged);
                    summary.applied.push(id);
                }
                Err(e) => {
                    error!("Failed to set '{}' to {}: {}", id, value, e);
                    self.settings.set_value(id, previous);
                    summary.failed.push((id, e));
                }
            }
        }

        let state = if summary.all_succeeded() {
            PropertyState::Ok
        } else {
            PropertyState::Alert
        };
        self.publish_settings(state);
        Ok(summary)
    }

    fn write_setting(&mut self, id: char, value: f64) -> WheelResult<f64> {
        if self.simulation {
            return Ok(value);
        }
        let reply = self.link()?.exchange(&Command::WriteSetting(id, value))?;
        parse_setting_value(&reply, id)
    }

    fn publish_settings(&mut self, state: PropertyState) {
        if self.settings.is_empty() {
            self.host.withdraw(PropertyKind::Settings);
        } else {
            self.host.publish(PropertyUpdate::Settings {
                settings: self.settings.snapshot(),
                state,
            });
        }
    }

    // ==================== Device Information ====================

    /// Identity reported by the handshake.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Configuration the wheel was connected with.
    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    /// Firmware version string.
    pub fn version(&mut self) -> WheelResult<String> {
        let result = self.query_version();
        self.report(result)
    }

    fn query_version(&mut self) -> WheelResult<String> {
        if self.simulation {
            return Ok("simulation".to_string());
        }
        let reply = self.link()?.exchange(&Command::Version)?;
        parse_version(&reply)
    }

    /// Number of filter slots as reported by the wheel.
    ///
    /// This does not change the configured `filter_count` used to range-check
    /// positions.
    pub fn query_filter_count(&mut self) -> WheelResult<u8> {
        let result = self.read_filter_count();
        self.report(result)
    }

    fn read_filter_count(&mut self) -> WheelResult<u8> {
        if self.simulation {
            return Ok(self.config.filter_count);
        }
        let reply = self.link()?.exchange(&Command::FilterCount)?;
        parse_filter_count(&reply)
    }

    // ==================== Per-Filter Data ====================

    /// Name stored on the wheel for the 1-based `position`.
    pub fn filter_name(&mut self, position: i32) -> WheelResult<String> {
        let result = self.read_filter_name(position);
        self.report(result)
    }

    fn read_filter_name(&mut self, position: i32) -> WheelResult<String> {
        let wire = self.wire_position(position)?;
        if self.simulation {
            return Ok(format!("Filter {position}"));
        }
        let reply = self.link()?.exchange(&Command::FilterName(wire))?;
        parse_filter_name(&reply, wire)
    }

    /// Store a name for the 1-based `position`.
    ///
    /// Names must be 1 to 64 printable ASCII characters.
    pub fn set_filter_name(&mut self, position: i32, name: &str) -> WheelResult<()> {
        let result = self.write_filter_name(position, name);
        self.report(result)
    }

    fn write_filter_name(&mut self, position: i32, name: &str) -> WheelResult<()> {
        let wire = self.wire_position(position)?;
        if name.is_empty()
            || name.len() > MAX_NAME_LEN
            || !name.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
        {
            return Err(WheelError::MalformedValue(format!(
                "filter name '{}'",
                protocol::dump(name.as_bytes())
            )));
        }
        if self.simulation {
            return Ok(());
        }
        let command = Command::SetFilterName(wire, name.to_string());
        let reply = self.link()?.exchange(&command)?;
        reply.payload_for(&command)?;
        Ok(())
    }

    /// Focus offset stored on the wheel for the 1-based `position`.
    pub fn filter_offset(&mut self, position: i32) -> WheelResult<i32> {
        let result = self.read_filter_offset(position);
        self.report(result)
    }

    fn read_filter_offset(&mut self, position: i32) -> WheelResult<i32> {
        let wire = self.wire_position(position)?;
        if self.simulation {
            return Ok(0);
        }
        let reply = self.link()?.exchange(&Command::FilterOffset(wire))?;
        parse_filter_offset(&reply, wire)
    }

    /// Store a focus offset for the 1-based `position`.
    pub fn set_filter_offset(&mut self, position: i32, offset: i32) -> WheelResult<()> {
        let result = self.write_filter_offset(position, offset);
        self.report(result)
    }

    fn write_filter_offset(&mut self, position: i32, offset: i32) -> WheelResult<()> {
        let wire = self.wire_position(position)?;
        if self.simulation {
            return Ok(());
        }
        let command = Command::SetFilterOffset(wire, offset);
        let reply = self.link()?.exchange(&command)?;
        reply.payload_for(&command)?;
        Ok(())
    }

    // ==================== Mode and Lifecycle ====================

    /// Whether I/O is currently bypassed.
    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    /// Bypass (or restore) all I/O.
    ///
    /// Leaving simulation requires a link; the cached identity and settings
    /// are kept as they are.
    pub fn set_simulation(&mut self, enabled: bool) -> WheelResult<()> {
        if !enabled && self.link.is_none() {
            let err = WheelError::NotConnected;
            self.host.message(&err.to_string());
            return Err(err);
        }
        if self.simulation != enabled {
            info!("Simulation {}", if enabled { "enabled" } else { "disabled" });
        }
        self.simulation = enabled;
        Ok(())
    }

    /// The host receiving property updates.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the host.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The underlying transport, if one is attached.
    pub fn transport(&self) -> Option<&T> {
        self.link.as_ref().map(Link::transport)
    }

    /// Tell the wheel to release the link and hand back the transport.
    pub fn disconnect(mut self) -> WheelResult<Option<T>> {
        if !self.simulation {
            if let Some(link) = self.link.as_mut() {
                let result = link.send(&Command::Disconnect);
                self.report(result)?;
            }
        }
        info!("Wheel disconnected");
        Ok(self.link.map(Link::into_inner))
    }

    // ==================== Utility Methods ====================

    fn link(&mut self) -> WheelResult<&mut Link<T>> {
        self.link.as_mut().ok_or(WheelError::NotConnected)
    }

    fn wire_position(&self, position: i32) -> WheelResult<u8> {
        let count = self.config.filter_count;
        if position < 1 || position > i32::from(count) {
            return Err(WheelError::OutOfRangePosition {
                requested: position,
                count,
            });
        }
        u8::try_from(position - 1).map_err(|_| WheelError::OutOfRangePosition {
            requested: position,
            count,
        })
    }

    fn report<R>(&mut self, result: WheelResult<R>) -> WheelResult<R> {
        if let Err(e) = &result {
            self.host.message(&e.to_string());
        }
        result
    }
}

fn check_config(config: &WheelConfig) -> WheelResult<()> {
    config.validate().map_err(|e| match e {
        ConfigError::Invalid(reason) => WheelError::InvalidConfig(reason),
        other => WheelError::InvalidConfig(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HostEvent, MockReply, MockTransport, RecordingHost};
    use approx::assert_relative_eq;

    fn config() -> WheelConfig {
        WheelConfig {
            poll_interval_ms: 1,
            ..Default::default()
        }
    }

    fn extended_mock() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN+Q7\r\n"]);
        mock.expect(b"s?\r\n", &[b"s?ab\r\n"]);
        mock.expect(b"sa\r\n", &[b"sa10\r\n"]);
        mock.expect(b"sa?\r\n", &[b"sa?Acceleration\r\n"]);
        mock.expect(b"sb\r\n", &[b"sb40\r\n"]);
        mock.expect(b"sb?\r\n", &[b"sb?Speed\r\n"]);
        mock
    }

    #[test]
    fn test_connect_publishes_initial_statistics() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN123\r\n"]);

        let wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        let host = wheel.host();
        assert_eq!(
            host.published(PropertyKind::SwitchDuration),
            vec![&PropertyUpdate::SwitchDuration { millis: 0 }]
        );
        assert_eq!(
            host.published(PropertyKind::SwitchPrecision),
            vec![&PropertyUpdate::SwitchPrecision { precision: 100.0 }]
        );
        assert!(host.was_withdrawn(PropertyKind::Settings));
        assert_eq!(wheel.query_filter(), 1);
    }

    #[test]
    fn test_connect_failure_forwards_message() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"XX\r\n"]);

        let mut host = RecordingHost::default();
        let err = QuantumWheel::connect(mock, &mut host, config()).err();
        assert!(matches!(err, Some(WheelError::UnexpectedReply { .. })));
        assert_eq!(host.messages().len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let bad_configs = [
            WheelConfig {
                read_timeout_secs: -1.0,
                ..config()
            },
            WheelConfig {
                move_deadline_secs: Some(f64::NAN),
                ..config()
            },
            WheelConfig {
                filter_count: 11,
                ..config()
            },
        ];

        for bad in bad_configs {
            let mut host = RecordingHost::default();
            let err = QuantumWheel::connect(MockTransport::new(), &mut host, bad.clone()).err();
            assert!(matches!(err, Some(WheelError::InvalidConfig(_))));
            assert_eq!(host.messages().len(), 1);
            assert!(host.published(PropertyKind::SwitchDuration).is_empty());

            let simulated = QuantumWheel::<MockTransport, _>::simulated(&mut host, bad);
            assert!(matches!(simulated.err(), Some(WheelError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_settings_list_failure_aborts_connect() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN+Q7\r\n"]);
        mock.expect_replies(b"s?\r\n", vec![MockReply::Timeout]);

        let result = QuantumWheel::connect(mock, RecordingHost::default(), config());
        assert!(matches!(result, Err(WheelError::TransportReadTimeout(_))));
    }

    #[test]
    fn test_discovered_settings_are_published() {
        let wheel =
            QuantumWheel::connect(extended_mock(), RecordingHost::default(), config()).unwrap();
        let settings = wheel.host().last_settings().unwrap();
        assert_eq!(
            settings,
            &[
                Setting::new('a', "Acceleration", 10.0),
                Setting::new('b', "Speed", 40.0)
            ]
        );
    }

    #[test]
    fn test_unchanged_values_are_not_sent() {
        let mut wheel =
            QuantumWheel::connect(extended_mock(), RecordingHost::default(), config()).unwrap();

        let summary = wheel.apply_setting_updates(&[('a', 10.0), ('b', 40.0)]).unwrap();
        assert_eq!(summary.unchanged, vec!['a', 'b']);
        assert!(summary.applied.is_empty());
        assert_eq!(wheel.transport().unwrap().sent_data().len(), 6);
    }

    #[test]
    fn test_write_uses_acknowledged_value() {
        let mut mock = extended_mock();
        mock.expect(b"sb55\r\n", &[b"sb54.5\r\n"]);

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        let summary = wheel.apply_setting_updates(&[('b', 55.0)]).unwrap();
        assert_eq!(summary.applied, vec!['b']);
        assert_relative_eq!(wheel.settings().value('b').unwrap(), 54.5);

        let last = wheel.host().published(PropertyKind::Settings);
        assert!(matches!(
            last.last(),
            Some(PropertyUpdate::Settings { state: PropertyState::Ok, .. })
        ));
    }

    #[test]
    fn test_out_of_range_value_rejects_batch() {
        let mut wheel =
            QuantumWheel::connect(extended_mock(), RecordingHost::default(), config()).unwrap();

        let result = wheel.apply_setting_updates(&[('a', 20.0), ('b', 150.0)]);
        assert!(matches!(
            result,
            Err(WheelError::SettingValueOutOfRange { id: 'b', .. })
        ));
        assert_eq!(wheel.transport().unwrap().sent_data().len(), 6);
        assert_relative_eq!(wheel.settings().value('a').unwrap(), 10.0);
    }

    #[test]
    fn test_updates_follow_request_order() {
        let mut mock = extended_mock();
        mock.expect(b"sb20\r\n", &[b"sb20\r\n"]);
        mock.expect(b"sa30\r\n", &[b"sa30\r\n"]);

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        let summary = wheel.apply_setting_updates(&[('b', 20.0), ('a', 30.0)]).unwrap();
        assert_eq!(summary.applied, vec!['b', 'a']);

        let lines = wheel.transport().unwrap().sent_lines();
        assert_eq!(&lines[6..], &["sb20", "sa30"]);
    }

    #[test]
    fn test_unmatched_lines_are_ignored_during_move() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect(b"G4\r\n", &[b"\x00\xfe\r\n", b"P2\r\n", b"P4:3.25\r\n"]);

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        wheel.select_filter(5).unwrap();
        assert_eq!(wheel.query_filter(), 5);
        assert_relative_eq!(wheel.statistics().precision, 3.25);
        assert_eq!(wheel.host().completed_moves(), vec![5]);
    }

    #[test]
    fn test_unterminated_line_is_ignored_during_move() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect_replies(
            b"G0\r\n",
            vec![
                MockReply::Line(vec![b'x'; 300]),
                MockReply::Line(b"P0\r\n".to_vec()),
            ],
        );

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        wheel.select_filter(1).unwrap();
        assert_eq!(wheel.host().completed_moves(), vec![1]);
        assert!(wheel.host().messages().is_empty());
    }

    #[test]
    fn test_read_failure_during_move_is_fatal() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect_replies(
            b"G1\r\n",
            vec![
                MockReply::Line(b"P0\r\n".to_vec()),
                MockReply::Failure("unplugged".to_string()),
            ],
        );

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        let result = wheel.select_filter(2);
        assert!(matches!(result, Err(WheelError::TransportReadFailed(_))));
        assert_eq!(wheel.query_filter(), 1);
        assert!(wheel.host().completed_moves().is_empty());
    }

    #[test]
    fn test_move_deadline() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect(b"G1\r\n", &[b"P0\r\n", b"P0\r\n", b"P0\r\n", b"P1\r\n"]);

        let config = WheelConfig {
            poll_interval_ms: 20,
            move_deadline_secs: Some(0.01),
            ..Default::default()
        };
        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config).unwrap();
        let result = wheel.select_filter(2);
        assert!(matches!(result, Err(WheelError::MoveDeadlineExceeded(_))));
        assert_eq!(wheel.query_filter(), 1);
    }

    #[test]
    fn test_simulation_moves_without_io() {
        let mut wheel =
            QuantumWheel::<MockTransport, _>::simulated(RecordingHost::default(), config())
                .unwrap();
        wheel.select_filter(6).unwrap();

        assert_eq!(wheel.query_filter(), 6);
        assert_eq!(wheel.statistics().duration_ms, SIMULATED_SWITCH_MS);
        assert_relative_eq!(wheel.statistics().precision, PRECISION_WORST);
        assert!(wheel.identity().quantum);
        assert!(wheel.settings().is_empty());
    }

    #[test]
    fn test_leaving_simulation_needs_link() {
        let mut wheel =
            QuantumWheel::<MockTransport, _>::simulated(RecordingHost::default(), config())
                .unwrap();
        assert!(matches!(
            wheel.set_simulation(false),
            Err(WheelError::NotConnected)
        ));
        assert!(wheel.is_simulation());

        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        wheel.set_simulation(true).unwrap();
        wheel.select_filter(3).unwrap();
        wheel.set_simulation(false).unwrap();
        assert_eq!(wheel.transport().unwrap().sent_data().len(), 1);
    }

    #[test]
    fn test_statistics_published_only_on_change() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect(b"G1\r\n", &[b"P1\r\n"]);
        mock.expect(b"G2\r\n", &[b"P2\r\n"]);

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        wheel.select_filter(2).unwrap();
        wheel.select_filter(3).unwrap();

        // Precision stays at the worst-case sentinel published on connect.
        assert_eq!(wheel.host().published(PropertyKind::SwitchPrecision).len(), 1);
    }

    #[test]
    fn test_filter_name_and_offset() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect(b"F2\r\n", &[b"F2H-alpha\r\n"]);
        mock.expect(b"f2OIII\r\n", &[b"f2OIII\r\n"]);
        mock.expect(b"O0\r\n", &[b"O0-15\r\n"]);
        mock.expect(b"o0120\r\n", &[b"o0\r\n"]);

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        assert_eq!(wheel.filter_name(3).unwrap(), "H-alpha");
        wheel.set_filter_name(3, "OIII").unwrap();
        assert_eq!(wheel.filter_offset(1).unwrap(), -15);
        wheel.set_filter_offset(1, 120).unwrap();
        assert_eq!(wheel.transport().unwrap().remaining_expectations(), 0);
    }

    #[test]
    fn test_bad_filter_name_rejected_before_io() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();

        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            wheel.set_filter_name(1, &long),
            Err(WheelError::MalformedValue(_))
        ));
        assert!(wheel.set_filter_name(1, "tab\there").is_err());
        assert!(matches!(
            wheel.filter_offset(9),
            Err(WheelError::OutOfRangePosition { requested: 9, count: 7 })
        ));
        assert_eq!(wheel.transport().unwrap().sent_data().len(), 1);
    }

    #[test]
    fn test_version_and_filter_count() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect(b"VR\r\n", &[b"VR2.3\r\n"]);
        mock.expect(b"EN\r\n", &[b"N5\r\n"]);

        let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        assert_eq!(wheel.version().unwrap(), "2.3");
        assert_eq!(wheel.query_filter_count().unwrap(), 5);
    }

    #[test]
    fn test_disconnect_sends_ds() {
        let mut mock = MockTransport::new();
        mock.expect(b"SN\r\n", &[b"SN1\r\n"]);
        mock.expect(b"DS\r\n", &[]);

        let wheel = QuantumWheel::connect(mock, RecordingHost::default(), config()).unwrap();
        let mock = wheel.disconnect().unwrap().unwrap();
        assert_eq!(mock.sent_lines(), vec!["SN", "DS"]);
    }

    #[test]
    fn test_host_events_order_for_move() {
        let mut wheel =
            QuantumWheel::<MockTransport, _>::simulated(RecordingHost::default(), config())
                .unwrap();
        wheel.host_mut().events.clear();
        wheel.select_filter(2).unwrap();

        assert_eq!(
            wheel.host().events,
            vec![
                HostEvent::Published(PropertyUpdate::SwitchDuration {
                    millis: SIMULATED_SWITCH_MS
                }),
                HostEvent::MoveComplete(2),
            ]
        );
    }
}

//! Scripted wheel for tests and dry runs.
//!
//! [`MockTransport`] plays back canned reply lines for each expected request,
//! recording everything written to it. [`RecordingHost`] captures every host
//! notification so tests can assert on what the engine published.
//!
//! # Example
//!
//! ```
//! use quantum_wheel::mock::{MockTransport, RecordingHost};
//! use quantum_wheel::{QuantumWheel, WheelConfig};
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"SN\r\n", &[b"SN1234\r\n"]);
//! mock.expect(b"G2\r\n", &[b"P1\r\n", b"P2\r\n"]);
//!
//! let config = WheelConfig { poll_interval_ms: 1, ..Default::default() };
//! let mut wheel = QuantumWheel::connect(mock, RecordingHost::default(), config).unwrap();
//! wheel.select_filter(3).unwrap();
//! assert_eq!(wheel.query_filter(), 3);
//! ```

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::host::{PropertyKind, PropertyUpdate, WheelHost};
use crate::protocol::dump;
use crate::transport::{Transport, TransportError};
use crate::wheel::Setting;

/// One scripted result for a `read_until` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Raw bytes delivered by the read, terminator included.
    Line(Vec<u8>),
    /// The read times out.
    Timeout,
    /// The read fails with an I/O error carrying this text.
    Failure(String),
}

#[derive(Debug)]
enum Outcome {
    Replies(VecDeque<MockReply>),
    WriteFailure,
}

#[derive(Debug)]
struct Expectation {
    request: Vec<u8>,
    outcome: Outcome,
}

/// In-memory [`Transport`] driven by a queue of request expectations.
///
/// Each write must match the next expectation exactly. Once matched, its
/// replies become the pending input; a new write discards whatever was not
/// read. Reads past the end of the pending input time out.
#[derive(Debug, Default)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    pending: VecDeque<MockReply>,
    sent: Vec<Vec<u8>>,
    clears: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `request`, answered by the given reply lines.
    pub fn expect(&mut self, request: &[u8], lines: &[&[u8]]) {
        let replies = lines.iter().map(|l| MockReply::Line(l.to_vec())).collect();
        self.expect_replies(request, replies);
    }

    /// Expect `request`, answered by arbitrary read outcomes.
    pub fn expect_replies(&mut self, request: &[u8], replies: Vec<MockReply>) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            outcome: Outcome::Replies(replies.into()),
        });
    }

    /// Expect `request`, whose write fails.
    pub fn expect_write_failure(&mut self, request: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            outcome: Outcome::WriteFailure,
        });
    }

    /// Every frame written so far, in order.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Written frames rendered as text without their terminators.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|frame| dump(frame.strip_suffix(b"\r\n").unwrap_or(frame.as_slice())))
            .collect()
    }

    /// Number of times stale input was discarded.
    pub fn clear_count(&self) -> usize {
        self.clears
    }

    /// Expectations not yet consumed by a write.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.sent.push(bytes.to_vec());

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("unexpected write <{}>", dump(bytes)),
            )));
        };

        if expectation.request != bytes {
            return Err(TransportError::Write(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "expected <{}>, got <{}>",
                    dump(&expectation.request),
                    dump(bytes)
                ),
            )));
        }

        match expectation.outcome {
            Outcome::Replies(replies) => {
                self.pending = replies;
                Ok(bytes.len())
            }
            Outcome::WriteFailure => Err(TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "link dropped",
            ))),
        }
    }

    fn read_until(
        &mut self,
        terminator: u8,
        timeout: Duration,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        match self.pending.pop_front() {
            Some(MockReply::Line(mut line)) => {
                if let Some(end) = line.iter().position(|&b| b == terminator) {
                    line.truncate(end + 1);
                }
                line.truncate(max_len);
                Ok(line)
            }
            Some(MockReply::Failure(reason)) => Err(TransportError::ReadFailed(io::Error::new(
                io::ErrorKind::Other,
                reason,
            ))),
            Some(MockReply::Timeout) | None => Err(TransportError::ReadTimeout(timeout)),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.clears += 1;
        Ok(())
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

/// A notification received by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Published(PropertyUpdate),
    Withdrawn(PropertyKind),
    MoveComplete(u8),
    Message(String),
}

/// [`WheelHost`] that records every call.
#[derive(Debug, Default, Clone)]
pub struct RecordingHost {
    pub events: Vec<HostEvent>,
}

impl RecordingHost {
    /// Positions reported through `move_complete`.
    pub fn completed_moves(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HostEvent::MoveComplete(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HostEvent::Message(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every update published for `kind`, oldest first.
    pub fn published(&self, kind: PropertyKind) -> Vec<&PropertyUpdate> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HostEvent::Published(u) if u.kind() == kind => Some(u),
                _ => None,
            })
            .collect()
    }

    /// Settings carried by the most recent settings publication.
    pub fn last_settings(&self) -> Option<&[Setting]> {
        self.published(PropertyKind::Settings)
            .last()
            .copied()
            .and_then(|u| match u {
                PropertyUpdate::Settings { settings, .. } => Some(settings.as_slice()),
                _ => None,
            })
    }

    pub fn was_withdrawn(&self, kind: PropertyKind) -> bool {
        self.events.contains(&HostEvent::Withdrawn(kind))
    }
}

impl WheelHost for RecordingHost {
    fn publish(&mut self, update: PropertyUpdate) {
        self.events.push(HostEvent::Published(update));
    }

    fn withdraw(&mut self, property: PropertyKind) {
        self.events.push(HostEvent::Withdrawn(property));
    }

    fn move_complete(&mut self, position: u8) {
        self.events.push(HostEvent::MoveComplete(position));
    }

    fn message(&mut self, text: &str) {
        self.events.push(HostEvent::Message(text.to_string()));
    }
}

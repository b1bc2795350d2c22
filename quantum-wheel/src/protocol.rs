//! Quantum wheel line protocol: command framing and reply parsing.
//!
//! # Protocol Overview
//!
//! The wheel speaks a line-oriented ASCII protocol. Commands are a one or two
//! character opcode with an optional argument, terminated by CR LF. Replies are
//! terminated by LF (usually preceded by CR) and begin by echoing the command
//! that elicited them.
//!
//! | Command           | Request          | Reply                                   |
//! |-------------------|------------------|-----------------------------------------|
//! | Identity          | `SN`             | `SN<details>`, `+` marks extended units |
//! | Version           | `VR`             | `VR<details>`                           |
//! | Filter count      | `EN`             | `N<count>`                              |
//! | Move              | `G<pos>`         | `P<pos>`, `P<pos>:<precision>`, `P<pos>:E<error>` |
//! | Filter name       | `F<pos>`         | `F<pos><name>`                          |
//! | Set filter name   | `f<pos><name>`   | `f<pos>...`                             |
//! | Filter offset     | `O<pos>`         | `O<pos><offset>`                        |
//! | Set filter offset | `o<pos><offset>` | `o<pos>...`                             |
//! | List settings     | `s?`             | `s?<id1><id2>...`                       |
//! | Read setting      | `s<id>`          | `s<id><value>`                          |
//! | Describe setting  | `s<id>?`         | `s<id>?<description>`                   |
//! | Write setting     | `s<id><value>`   | `s<id><value>`                          |
//! | Disconnect        | `DS`             | none                                    |
//!
//! Positions on the wire are 0-based single digits.
//!
//! # Example
//!
//! ```
//! use quantum_wheel::protocol::{parse_move_reply, Command, MoveReply, Reply};
//!
//! let command = Command::Move(3);
//! assert_eq!(command.encode(), b"G3\r\n");
//!
//! let reply = Reply::from_frame(b"P3:12.5\r\n".to_vec()).unwrap();
//! assert_eq!(
//!     parse_move_reply(&reply, 3),
//!     MoveReply::Arrived { precision: Some(12.5) }
//! );
//! ```

use tracing::warn;

use crate::error::{WheelError, WheelResult};

/// Terminator appended to every command.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Byte that ends a reply line.
pub const LINE_END: u8 = b'\n';

/// Upper bound on a reply frame, terminator included.
pub const MAX_FRAME_LEN: usize = 255;

/// Upper bound on a setting description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 64;

/// Upper bound on a filter name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Precision reported when the wheel does not provide one.
pub const PRECISION_WORST: f64 = 100.0;

/// A single protocol request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Identity,
    Version,
    FilterCount,
    /// Move to a 0-based wire position.
    Move(u8),
    FilterName(u8),
    SetFilterName(u8, String),
    FilterOffset(u8),
    SetFilterOffset(u8, i32),
    ListSettings,
    ReadSetting(char),
    DescribeSetting(char),
    WriteSetting(char, f64),
    Disconnect,
}

impl Command {
    /// Opcode verb, without arguments.
    pub fn opcode(&self) -> &'static str {
        match self {
            Command::Identity => "SN",
            Command::Version => "VR",
            Command::FilterCount => "EN",
            Command::Move(_) => "G",
            Command::FilterName(_) => "F",
            Command::SetFilterName(..) => "f",
            Command::FilterOffset(_) => "O",
            Command::SetFilterOffset(..) => "o",
            Command::ListSettings
            | Command::ReadSetting(_)
            | Command::DescribeSetting(_)
            | Command::WriteSetting(..) => "s",
            Command::Disconnect => "DS",
        }
    }

    /// Command text without the terminator.
    pub fn body(&self) -> String {
        let op = self.opcode();
        match self {
            Command::Identity | Command::Version | Command::FilterCount | Command::Disconnect => {
                op.to_string()
            }
            Command::Move(pos) | Command::FilterName(pos) | Command::FilterOffset(pos) => {
                format!("{op}{pos}")
            }
            Command::SetFilterName(pos, name) => format!("{op}{pos}{name}"),
            Command::SetFilterOffset(pos, offset) => format!("{op}{pos}{offset}"),
            Command::ListSettings => format!("{op}?"),
            Command::ReadSetting(id) => format!("{op}{id}"),
            Command::DescribeSetting(id) => format!("{op}{id}?"),
            Command::WriteSetting(id, value) => format!("{op}{id}{value}"),
        }
    }

    /// Wire bytes: the body followed by CR LF.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.body().into_bytes();
        bytes.extend_from_slice(TERMINATOR);
        bytes
    }

    /// Prefix a reply must start with to belong to this command.
    ///
    /// `None` for commands the wheel does not answer.
    pub fn reply_prefix(&self) -> Option<String> {
        match self {
            Command::Identity => Some("SN".to_string()),
            Command::Version => Some("VR".to_string()),
            Command::FilterCount => Some("N".to_string()),
            Command::Move(pos) => Some(format!("P{pos}")),
            Command::FilterName(pos) => Some(format!("F{pos}")),
            Command::SetFilterName(pos, _) => Some(format!("f{pos}")),
            Command::FilterOffset(pos) => Some(format!("O{pos}")),
            Command::SetFilterOffset(pos, _) => Some(format!("o{pos}")),
            Command::ListSettings => Some("s?".to_string()),
            Command::ReadSetting(id) | Command::WriteSetting(id, _) => Some(format!("s{id}")),
            Command::DescribeSetting(id) => Some(format!("s{id}?")),
            Command::Disconnect => None,
        }
    }
}

/// One reply line with its terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    line: Vec<u8>,
}

impl Reply {
    /// Strip the LF terminator (and any CR before it) from a raw frame.
    ///
    /// A frame without LF means the device filled [`MAX_FRAME_LEN`] without
    /// ending the line, which is rejected as [`WheelError::UnexpectedReply`].
    pub fn from_frame(mut raw: Vec<u8>) -> WheelResult<Self> {
        if raw.last() != Some(&LINE_END) {
            return Err(WheelError::UnexpectedReply {
                expected: "line terminated by LF".to_string(),
                actual: dump(&raw),
            });
        }
        while matches!(raw.last(), Some(b'\n' | b'\r')) {
            raw.pop();
        }
        Ok(Self { line: raw })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.line
    }

    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.line.starts_with(prefix.as_bytes())
    }

    /// Bytes following `prefix`, or `UnexpectedReply` if the line does not
    /// start with it.
    pub fn payload(&self, prefix: &str) -> WheelResult<&[u8]> {
        if self.starts_with(prefix) {
            Ok(&self.line[prefix.len()..])
        } else {
            Err(WheelError::UnexpectedReply {
                expected: prefix.to_string(),
                actual: dump(&self.line),
            })
        }
    }

    /// Payload for the reply to `command`.
    pub fn payload_for(&self, command: &Command) -> WheelResult<&[u8]> {
        match command.reply_prefix() {
            Some(prefix) => self.payload(&prefix),
            None => Ok(&self.line),
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&dump(&self.line))
    }
}

/// Render bytes for diagnostics, escaping non-printable bytes as `[XX]`.
pub fn dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!("[{b:02X}]"));
        }
    }
    out
}

/// Identity and capabilities reported by the `SN` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// The device answered `SN` with an `SN` echo.
    pub quantum: bool,
    /// The device advertised the settings sub-protocol with a `+`.
    pub extended: bool,
    /// Text following the `SN` echo.
    pub details: String,
}

/// Classify the reply to [`Command::Identity`].
pub fn parse_identity(reply: &Reply) -> WheelResult<DeviceIdentity> {
    let payload = reply.payload_for(&Command::Identity)?;
    Ok(DeviceIdentity {
        quantum: true,
        extended: payload.contains(&b'+'),
        details: text(payload),
    })
}

/// Firmware version text from the reply to [`Command::Version`].
pub fn parse_version(reply: &Reply) -> WheelResult<String> {
    Ok(text(reply.payload_for(&Command::Version)?))
}

/// Outcome of one line read while waiting for a move.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveReply {
    /// The line is not the position marker being waited for.
    Pending,
    /// The wheel reached the position.
    Arrived { precision: Option<f64> },
    /// The wheel reported an error in its extended status.
    Failed(String),
}

/// Classify a line read after `G<position>`.
pub fn parse_move_reply(reply: &Reply, position: u8) -> MoveReply {
    let Ok(payload) = reply.payload_for(&Command::Move(position)) else {
        return MoveReply::Pending;
    };

    match payload {
        [b':', b'E', diagnostic @ ..] => MoveReply::Failed(text(diagnostic)),
        [b':', status @ ..] => match parse_decimal(status) {
            Ok(precision) => MoveReply::Arrived {
                precision: Some(precision),
            },
            Err(e) => {
                warn!("Ignoring precision reported by device: {}", e);
                MoveReply::Arrived { precision: None }
            }
        },
        _ => MoveReply::Arrived { precision: None },
    }
}

/// Setting identifiers from the `s?` listing, at most `ceiling` of them.
///
/// Scanning stops at CR, LF or NUL. Non-printable bytes and repeated
/// identifiers are skipped.
pub fn parse_settings_list(reply: &Reply, ceiling: usize) -> WheelResult<Vec<char>> {
    let payload = reply.payload_for(&Command::ListSettings)?;
    let mut ids = Vec::new();

    for &b in payload {
        if ids.len() >= ceiling || matches!(b, b'\r' | b'\n' | 0) {
            break;
        }
        if !b.is_ascii_graphic() {
            warn!("Skipping non-printable setting identifier [{:02X}]", b);
            continue;
        }
        let id = b as char;
        if is_ambiguous_setting_id(b) {
            warn!("Skipping ambiguous setting identifier '{}'", id);
            continue;
        }
        if ids.contains(&id) {
            warn!("Skipping repeated setting identifier '{}'", id);
            continue;
        }
        ids.push(id);
    }

    Ok(ids)
}

// These would collide with the `s?` listing or with a written value.
fn is_ambiguous_setting_id(b: u8) -> bool {
    b.is_ascii_digit() || matches!(b, b'?' | b'.' | b'-' | b'+')
}

/// Value of setting `id` from its `s<id><value>` reply.
pub fn parse_setting_value(reply: &Reply, id: char) -> WheelResult<f64> {
    parse_decimal(reply.payload_for(&Command::ReadSetting(id))?)
}

/// Description of setting `id`, bounded to [`MAX_DESCRIPTION_LEN`] characters.
pub fn parse_setting_description(reply: &Reply, id: char) -> WheelResult<String> {
    let payload = reply.payload_for(&Command::DescribeSetting(id))?;
    Ok(text(payload).chars().take(MAX_DESCRIPTION_LEN).collect())
}

/// Filter count from the `N<count>` reply to `EN`.
pub fn parse_filter_count(reply: &Reply) -> WheelResult<u8> {
    let payload = reply.payload_for(&Command::FilterCount)?;
    let digits = numeric_str(payload)?;
    digits
        .parse()
        .map_err(|_| WheelError::MalformedValue(format!("filter count '{digits}'")))
}

/// Name of the filter at wire position `position`.
pub fn parse_filter_name(reply: &Reply, position: u8) -> WheelResult<String> {
    let payload = reply.payload_for(&Command::FilterName(position))?;
    Ok(text(payload).chars().take(MAX_NAME_LEN).collect())
}

/// Focus offset of the filter at wire position `position`.
pub fn parse_filter_offset(reply: &Reply, position: u8) -> WheelResult<i32> {
    let payload = reply.payload_for(&Command::FilterOffset(position))?;
    let digits = numeric_str(payload)?;
    digits
        .parse()
        .map_err(|_| WheelError::MalformedValue(format!("filter offset '{digits}'")))
}

/// Parse a decimal number that must consume the whole payload.
///
/// Leading whitespace and a trailing CR/LF are accepted; anything else after
/// the number rejects the parse.
pub fn parse_decimal(payload: &[u8]) -> WheelResult<f64> {
    let s = numeric_str(payload)?;
    match s.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(WheelError::MalformedValue(format!("'{}'", dump(payload)))),
    }
}

fn numeric_str(payload: &[u8]) -> WheelResult<&str> {
    let s = std::str::from_utf8(payload)
        .map_err(|_| WheelError::MalformedValue(format!("'{}'", dump(payload))))?;
    let s = s.trim_start().trim_end_matches(['\r', '\n']);
    if s.is_empty() {
        return Err(WheelError::MalformedValue("empty value".to_string()));
    }
    Ok(s)
}

fn text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_end_matches(['\r', '\n', '\0'])
        .trim()
        .to_string()
}

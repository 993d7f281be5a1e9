//! Riing Quad HID packets.

use crate::{
    color::Rgb,
    error::{ControlError, ControlResult},
};

/// Every reply from the controller is one full report of this size.
pub const RESPONSE_LEN: usize = 193;

/// Status byte the controller returns for an accepted command.
pub const STATUS_OK: u8 = 0xFC;

/// Addressable LEDs per fan port.
pub const LEDS_PER_PORT: usize = 54;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Init,
    GetFirmwareVersion,
    GetData { port: u8 },
    SetSpeed { port: u8, speed: u8 },
    SetRgb { port: u8, mode: u8, colors: Vec<Rgb> },
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::Init => vec![0x00, 0xFE, 0x33],
            Command::GetFirmwareVersion => vec![0x00, 0x33, 0x50],
            Command::GetData { port } => vec![0x00, 0x33, 0x51, port],
            Command::SetSpeed { port, speed } => vec![0x00, 0x32, 0x51, port, 0x01, speed],
            Command::SetRgb {
                port,
                mode,
                ref colors,
            } => {
                let mut buf = Vec::with_capacity(5 + 3 * colors.len());
                buf.extend_from_slice(&[0x00, 0x32, 0x52, port, mode]);
                // The controller expects GRB order.
                for c in colors {
                    buf.extend_from_slice(&[c.green, c.red, c.blue]);
                }
                buf
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Status(u8),
    FirmwareVersion { major: u8, minor: u8, patch: u8 },
    Data { speed: u8, rpm: u16 },
}

impl Response {
    pub fn parse(cmd: &Command, buf: &[u8]) -> ControlResult<Self> {
        let short = |what: &str| {
            ControlError::UnsupportedOperation(format!("short {what} reply ({} bytes)", buf.len()))
        };
        match cmd {
            Command::Init | Command::SetSpeed { .. } | Command::SetRgb { .. } => {
                let code = buf.get(2).copied().ok_or_else(|| short("status"))?;
                Ok(Response::Status(code))
            }
            Command::GetFirmwareVersion => match buf {
                [major, minor, patch, ..] => Ok(Response::FirmwareVersion {
                    major: *major,
                    minor: *minor,
                    patch: *patch,
                }),
                _ => Err(short("firmware")),
            },
            Command::GetData { .. } => match buf {
                [_, _, speed, lo, hi, ..] => Ok(Response::Data {
                    speed: *speed,
                    rpm: u16::from(*hi) << 8 | u16::from(*lo),
                }),
                _ => Err(short("data")),
            },
        }
    }
}

/// Animation speed offset added to an effect's base byte.
const NORMAL_SPEED: u8 = 0x02;

/// Lighting effects understood by the controller, by the name profiles use.
///
/// `off` and `fixed` are both direct writes; `off` simply sends black.
pub const EFFECTS: &[(&str, Effect)] = &[
    ("off", Effect::Direct),
    ("fixed", Effect::Direct),
    ("flow", Effect::Animated(0x00)),
    ("spectrum", Effect::Animated(0x04)),
    ("ripple", Effect::Animated(0x08)),
    ("blink", Effect::Animated(0x0C)),
    ("pulse", Effect::Animated(0x10)),
    ("breathing", Effect::Animated(0x10)),
    ("wave", Effect::Animated(0x14)),
];

/// Whole-controller effects accepted on the `sync` channel. Each one maps to
/// a per-port effect written to every port.
pub const SYNC_EFFECTS: &[(&str, &str)] = &[("spectrum-wave", "spectrum"), ("color-cycle", "flow")];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Direct,
    Animated(u8),
}

impl Effect {
    pub fn lookup(name: &str) -> Option<Effect> {
        EFFECTS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, effect)| *effect)
    }

    pub fn mode_byte(self) -> u8 {
        match self {
            Effect::Direct => 0x24,
            Effect::Animated(base) => base + NORMAL_SPEED,
        }
    }
}

/// Repeats `colors` across all LEDs of a port. An empty slice yields black.
pub fn fill_port(colors: &[Rgb]) -> Vec<Rgb> {
    if colors.is_empty() {
        return vec![Rgb::BLACK; LEDS_PER_PORT];
    }
    colors.iter().copied().cycle().take(LEDS_PER_PORT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_speed_bytes_and_parse_status() {
        let cmd = Command::SetSpeed {
            port: 2,
            speed: 123,
        };
        assert_eq!(cmd.to_bytes(), vec![0x00, 0x32, 0x51, 2, 0x01, 123]);

        let mut buf = [0u8; RESPONSE_LEN];
        buf[2] = STATUS_OK;
        assert_eq!(Response::parse(&cmd, &buf).unwrap(), Response::Status(STATUS_OK));
    }

    #[test]
    fn get_data_parse() {
        let cmd = Command::GetData { port: 1 };
        let mut buf = [0u8; RESPONSE_LEN];
        buf[2] = 55;
        buf[3] = 0x10;
        buf[4] = 0x20;
        assert_eq!(
            Response::parse(&cmd, &buf).unwrap(),
            Response::Data {
                speed: 55,
                rpm: 0x2010
            }
        );
    }

    #[test]
    fn set_rgb_bytes_are_grb() {
        let cmd = Command::SetRgb {
            port: 3,
            mode: 0x24,
            colors: fill_port(&[Rgb::new(1, 2, 3)]),
        };
        let bytes = cmd.to_bytes();
        assert_eq!(bytes[0..5], [0x00, 0x32, 0x52, 3, 0x24]);
        for chunk in bytes[5..].chunks(3) {
            assert_eq!(chunk, &[2, 1, 3]);
        }
        assert_eq!(bytes.len(), 5 + LEDS_PER_PORT * 3);
    }

    #[test]
    fn short_replies_are_errors() {
        assert!(Response::parse(&Command::Init, &[0x00]).is_err());
        assert!(Response::parse(&Command::GetData { port: 1 }, &[0, 0, 1]).is_err());
        assert_eq!(
            Response::parse(&Command::GetFirmwareVersion, &[1, 4, 2]).unwrap(),
            Response::FirmwareVersion {
                major: 1,
                minor: 4,
                patch: 2
            }
        );
    }

    #[test]
    fn effects_map_to_mode_bytes() {
        assert_eq!(Effect::lookup("fixed").map(Effect::mode_byte), Some(0x24));
        assert_eq!(Effect::lookup("spectrum").map(Effect::mode_byte), Some(0x06));
        assert_eq!(
            Effect::lookup("breathing").map(Effect::mode_byte),
            Effect::lookup("pulse").map(Effect::mode_byte)
        );
        assert_eq!(Effect::lookup("spectrum-wave"), None);
    }

    #[test]
    fn colors_cycle_across_the_port() {
        let (a, b) = (Rgb::new(1, 0, 0), Rgb::new(0, 1, 0));
        let filled = fill_port(&[a, b]);
        assert_eq!(filled.len(), LEDS_PER_PORT);
        assert_eq!(&filled[..4], &[a, b, a, b]);
        assert!(fill_port(&[]).iter().all(|c| *c == Rgb::BLACK));
    }
}

use crate::{
    color::Rgb,
    error::{ControlError, ControlResult},
};

use super::{
    device_io::DeviceIO,
    protocol::{Command, RESPONSE_LEN, Response, STATUS_OK},
};

/// HID communication timeout in milliseconds.
pub const READ_TIMEOUT: i32 = 250;

/// Request/response layer over one controller.
///
/// # Type Parameters
///
/// * `Io` - Device I/O implementation (typically HidDevice)
#[derive(Debug)]
pub struct Controller<Io: DeviceIO> {
    dev: Io,
}

impl<Io: DeviceIO> Controller<Io> {
    pub fn new(dev: Io) -> Self {
        Self { dev }
    }

    fn request(&self, cmd: Command) -> ControlResult<Response> {
        self.dev.write(&cmd.to_bytes())?;
        let mut buf = vec![0u8; RESPONSE_LEN];
        self.dev.read(&mut buf, READ_TIMEOUT)?;
        Response::parse(&cmd, &buf)
    }

    fn expect_ok(&self, cmd: Command, what: &str) -> ControlResult<()> {
        match self.request(cmd)? {
            Response::Status(STATUS_OK) => Ok(()),
            Response::Status(code) => Err(ControlError::UnsupportedOperation(format!(
                "{what} rejected with status {code:#04x}"
            ))),
            other => Err(ControlError::UnsupportedOperation(format!(
                "unexpected {what} reply: {other:?}"
            ))),
        }
    }

    /// Puts the controller into software-controlled mode. Must precede other
    /// commands after power-up.
    pub fn init(&self) -> ControlResult<()> {
        self.expect_ok(Command::Init, "init")
    }

    /// Returns (major, minor, patch).
    pub fn firmware_version(&self) -> ControlResult<(u8, u8, u8)> {
        match self.request(Command::GetFirmwareVersion)? {
            Response::FirmwareVersion {
                major,
                minor,
                patch,
            } => Ok((major, minor, patch)),
            other => Err(ControlError::UnsupportedOperation(format!(
                "unexpected firmware reply: {other:?}"
            ))),
        }
    }

    /// Sets the duty of a 1-based fan port.
    pub fn set_speed(&self, port: u8, speed: u8) -> ControlResult<()> {
        self.expect_ok(Command::SetSpeed { port, speed }, "set speed")
    }

    /// Reads (speed percentage, rpm) of a 1-based fan port.
    pub fn get_data(&self, port: u8) -> ControlResult<(u8, u16)> {
        match self.request(Command::GetData { port })? {
            Response::Data { speed, rpm } => Ok((speed, rpm)),
            other => Err(ControlError::UnsupportedOperation(format!(
                "unexpected data reply: {other:?}"
            ))),
        }
    }

    pub fn set_rgb(&self, port: u8, mode: u8, colors: Vec<Rgb>) -> ControlResult<()> {
        self.expect_ok(Command::SetRgb { port, mode, colors }, "set rgb")
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockIo;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn init_sends_init_packet() {
        let io = MockIo::default();
        Controller::new(io.clone()).init().unwrap();
        assert_eq!(io.written(), vec![vec![0x00, 0xFE, 0x33]]);
    }

    #[test]
    fn rejected_status_is_an_error() {
        let io = MockIo::default();
        io.queue_reply(vec![0, 0, 0xFE]);
        let err = Controller::new(io).set_speed(1, 40).unwrap_err();
        assert!(err.to_string().contains("0xfe"), "{err}");
    }

    #[test]
    fn reads_fan_data_and_firmware() {
        let io = MockIo::default();
        io.queue_reply(vec![0, 0, 40, 0xDC, 0x05]);
        io.queue_reply(vec![1, 4, 2]);
        let controller = Controller::new(io.clone());

        assert_eq!(controller.get_data(3).unwrap(), (40, 1500));
        assert_eq!(controller.firmware_version().unwrap(), (1, 4, 2));
        assert_eq!(io.written()[0], vec![0x00, 0x33, 0x51, 3]);
    }

    #[test]
    fn transport_errors_propagate() {
        let io = MockIo::default();
        io.0.lock().unwrap().fail_reads = Some(ControlError::NotFound("unplugged".into()));
        let err = Controller::new(io).init().unwrap_err();
        assert!(err.is_not_found());
    }
}

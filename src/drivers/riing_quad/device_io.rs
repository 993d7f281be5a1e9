use hidapi::HidDevice;

use crate::error::{ControlError, ControlResult};

/// Raw report transport under the Riing Quad controller.
pub trait DeviceIO: Send + 'static {
    fn write(&self, buf: &[u8]) -> ControlResult<usize>;
    fn read(&self, buf: &mut [u8], timeout: i32) -> ControlResult<()>;
}

impl DeviceIO for HidDevice {
    fn write(&self, buf: &[u8]) -> ControlResult<usize> {
        Ok(Self::write(self, buf)?)
    }

    fn read(&self, buf: &mut [u8], timeout: i32) -> ControlResult<()> {
        match Self::read_timeout(self, buf, timeout)? {
            0 => Err(ControlError::UnsupportedOperation(
                "controller did not answer in time".into(),
            )),
            _ => Ok(()),
        }
    }
}

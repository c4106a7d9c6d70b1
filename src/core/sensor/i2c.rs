//! `RegisterBus` over the Linux `i2c-dev` character device.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::core::sensor::bno055::RegisterBus;

/// `ioctl` request selecting the slave address for subsequent transfers.
const I2C_SLAVE: libc::c_ulong = 0x0703;

#[derive(Debug)]
pub struct LinuxI2cBus {
    file: File,
    path: PathBuf,
    address: u8,
}

impl LinuxI2cBus {
    /// Opens `path` (e.g. `/dev/i2c-1`) and binds it to `address`.
    ///
    /// # Errors
    /// - the device node cannot be opened read/write
    /// - the `I2C_SLAVE` ioctl is rejected (not an i2c-dev node, address busy)
    pub fn open(path: impl AsRef<Path>, address: u8) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let result = unsafe {
            libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, libc::c_ulong::from(address))
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        debug!("Opened {} for device {:#04x}", path.display(), address);
        Ok(Self {
            file,
            path,
            address,
        })
    }

    /// `/dev/i2c-1@0x28`
    pub fn label(&self) -> String {
        format!("{}@{:#04x}", self.path.display(), self.address)
    }
}

impl RegisterBus for LinuxI2cBus {
    fn write_register(&mut self, register: u8, value: u8) -> io::Result<()> {
        self.file.write_all(&[register, value])
    }

    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> io::Result<usize> {
        self.file.write_all(&[register])?;
        self.file.read(buf)
    }
}

//! Devices bound to I/O ports.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use super::value::Bytes;

/// A port-addressed peripheral driven by `READ` and `WRITE`.
///
/// Any synchronisation needed to share a device between engines is the
/// device's own business.
pub trait Device {
    /// Fill up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Consume `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("device is not {}", what))
}

/// Adapts a std reader and/or writer into a device.
pub struct IoDevice<R, W> {
    reader: Option<R>,
    writer: Option<W>,
}

impl<R: Read, W: Write> IoDevice<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
        }
    }
}

impl<R: Read> IoDevice<R, io::Sink> {
    /// A read-only device; writes fail.
    pub fn input(reader: R) -> Self {
        Self {
            reader: Some(reader),
            writer: None,
        }
    }
}

impl<W: Write> IoDevice<io::Empty, W> {
    /// A write-only device; reads fail.
    pub fn output(writer: W) -> Self {
        Self {
            reader: None,
            writer: Some(writer),
        }
    }
}

impl<R: Read, W: Write> Device for IoDevice<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(r) => r.read(buf),
            None => Err(unsupported("readable")),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let w = self.writer.as_mut().ok_or_else(|| unsupported("writable"))?;
        w.write_all(buf)?;
        w.flush()?;
        Ok(buf.len())
    }
}

/// Reads hit end-of-input, writes are discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevice;

impl Device for NullDevice {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

/// An in-memory device: reads drain a scripted input queue, writes append to
/// an output buffer the host keeps a handle to.
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    input: VecDeque<u8>,
    output: Bytes,
}

impl LoopbackDevice {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        let input: Vec<u8> = input.into();
        Self {
            input: VecDeque::from(input),
            output: Bytes::default(),
        }
    }

    /// Shared handle to everything written so far.
    pub fn output(&self) -> Bytes {
        self.output.clone()
    }

    pub fn pending_input(&self) -> usize {
        self.input.len()
    }
}

impl Device for LoopbackDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_drains_input() {
        let mut dev = LoopbackDevice::new(b"hello".to_vec());
        let mut buf = [0u8; 3];
        assert_eq!(Device::read(&mut dev, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(dev.pending_input(), 2);
        assert_eq!(Device::read(&mut dev, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(Device::read(&mut dev, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_loopback_captures_output() {
        let mut dev = LoopbackDevice::default();
        let out = dev.output();
        Device::write(&mut dev, b"ab").unwrap();
        Device::write(&mut dev, b"c").unwrap();
        assert_eq!(out.to_vec(), b"abc");
    }

    #[test]
    fn test_io_device_direction() {
        let mut input = IoDevice::input(io::Cursor::new(b"xyz".to_vec()));
        let mut buf = [0u8; 8];
        assert_eq!(Device::read(&mut input, &mut buf).unwrap(), 3);
        let err = Device::write(&mut input, b"no").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let mut output = IoDevice::output(Vec::new());
        assert_eq!(Device::write(&mut output, b"yes").unwrap(), 3);
        assert!(Device::read(&mut output, &mut buf).is_err());
    }

    #[test]
    fn test_null_device() {
        let mut dev = NullDevice;
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf).unwrap(), 0);
        assert_eq!(dev.write(b"gone").unwrap(), 4);
    }
}

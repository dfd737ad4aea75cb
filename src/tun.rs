//! TUN device abstraction. §1 lists both the device itself and its stub
//! fallback as out-of-scope external collaborators; what's in scope is the
//! orchestrator's attempt-then-fallback (§4.8), so this module stays a thin
//! trait plus the two implementations that decision needs.

use std::io;

pub trait TunDevice: Send + Sync {
    /// Non-blocking-ish read: returns `Ok(0)` (not an error) when nothing is
    /// available right now, so callers can poll a stop flag in between.
    fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_packet(&self, pkt: &[u8]) -> io::Result<()>;
    fn is_stub(&self) -> bool;
}

/// Used when no real TUN device could be opened (no privilege, no `/dev/net/tun`,
/// non-Linux host). Core-facing forwarding degrades to `n6_stub` accounting
/// instead of a write syscall.
pub struct StubTun;

impl TunDevice for StubTun {
    fn read_packet(&self, _buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(std::time::Duration::from_millis(50));
        Ok(0)
    }

    fn write_packet(&self, _pkt: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn is_stub(&self) -> bool {
        true
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::TunDevice;
    use std::io;
    use std::os::unix::io::RawFd;

    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_NO_PI: libc::c_short = 0x1000;
    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

    #[repr(C)]
    struct IfReq {
        name: [libc::c_char; libc::IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    pub struct LinuxTun {
        fd: RawFd,
    }

    impl LinuxTun {
        pub fn open(name: &str) -> io::Result<Self> {
            let path = std::ffi::CString::new("/dev/net/tun").unwrap();
            let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let mut req: IfReq = unsafe { std::mem::zeroed() };
            for (dst, src) in req.name.iter_mut().zip(name.as_bytes()) {
                *dst = *src as libc::c_char;
            }
            req.flags = IFF_TUN | IFF_NO_PI;

            let rc = unsafe { libc::ioctl(fd, TUNSETIFF, &mut req) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
            Ok(LinuxTun { fd })
        }
    }

    impl Drop for LinuxTun {
        fn drop(&mut self) {
            unsafe { libc::close(self.fd) };
        }
    }

    unsafe impl Send for LinuxTun {}
    unsafe impl Sync for LinuxTun {}

    impl TunDevice for LinuxTun {
        fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(0);
                }
                return Err(err);
            }
            Ok(n as usize)
        }

        fn write_packet(&self, pkt: &[u8]) -> io::Result<()> {
            let n = unsafe { libc::write(self.fd, pkt.as_ptr() as *const libc::c_void, pkt.len()) };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn is_stub(&self) -> bool {
            false
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::LinuxTun;

/// Attempts to open a real TUN device, falling back to `StubTun` when it
/// can't — matching §4.8's "open the TUN device (falling back to stub mode if
/// unavailable)".
pub fn open_or_stub(name: &str) -> Box<dyn TunDevice> {
    #[cfg(target_os = "linux")]
    {
        match LinuxTun::open(name) {
            Ok(tun) => return Box::new(tun),
            Err(e) => {
                tracing::warn!(error = %e, "failed to open TUN device, falling back to stub");
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
    }
    Box::new(StubTun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_reads_return_zero_without_error() {
        let tun = StubTun;
        let mut buf = [0u8; 16];
        assert_eq!(tun.read_packet(&mut buf).unwrap(), 0);
        assert!(tun.is_stub());
    }

    #[test]
    fn stub_writes_succeed() {
        let tun = StubTun;
        assert!(tun.write_packet(&[1, 2, 3]).is_ok());
    }
}

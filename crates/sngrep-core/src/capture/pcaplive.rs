//! Live capture from an `AF_PACKET` raw socket.
//!
//! Grounded on `original_source/src/pcap.c` (`capture_online`,
//! `capture_set_filter`) for the device-open/apply-filter/read-loop shape,
//! realized over `tokio::io::unix::AsyncFd` + `libc` rather than libpcap
//! FFI, matching how `nlink`'s own sockets are opened (`libc::socket` +
//! `AsyncFd`, e.g. `nlink::netlink::connection::Connection`).

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use tokio::io::unix::AsyncFd;

use crate::error::{Error, Result};

/// A single classic-BPF instruction (`struct sock_filter`). The core never
/// compiles a tcpdump-style expression itself (§9 open question) — it only
/// accepts pre-assembled bytecode from a caller that already did so.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

struct RawSocket(RawFd);

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Live capture from a named interface (or "any") via `AF_PACKET`.
pub struct PcapLiveInput {
    device: String,
    bpf_expression: Option<String>,
    fd: AsyncFd<RawSocket>,
    paused: bool,
    frames_read: u64,
}

fn htons(v: u16) -> u16 {
    v.to_be()
}

impl PcapLiveInput {
    /// Open a raw `AF_PACKET` socket bound to `device` ("any" for every
    /// interface), non-blocking, ready for `tokio::io::unix::AsyncFd`.
    pub fn open(device: impl Into<String>, bpf_expression: Option<String>) -> Result<Self> {
        let device = device.into();
        const ETH_P_ALL: u16 = 0x0003;

        let raw_fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                htons(ETH_P_ALL) as i32,
            )
        };
        if raw_fd < 0 {
            return Err(Error::Device {
                device: device.clone(),
                message: io::Error::last_os_error().to_string(),
            });
        }
        let socket = RawSocket(raw_fd);

        if device != "any" {
            let ifindex = unsafe {
                let name = std::ffi::CString::new(device.as_str())
                    .map_err(|_| Error::Device {
                        device: device.clone(),
                        message: "interface name contains a NUL byte".to_string(),
                    })?;
                libc::if_nametoindex(name.as_ptr())
            };
            if ifindex == 0 {
                return Err(Error::Device {
                    device: device.clone(),
                    message: "unknown interface".to_string(),
                });
            }
            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = htons(ETH_P_ALL);
            addr.sll_ifindex = ifindex as i32;
            let rc = unsafe {
                libc::bind(
                    socket.as_raw_fd(),
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as u32,
                )
            };
            if rc < 0 {
                return Err(Error::Device {
                    device: device.clone(),
                    message: io::Error::last_os_error().to_string(),
                });
            }
        }

        let fd = AsyncFd::new(socket).map_err(Error::Io)?;
        Ok(Self {
            device,
            bpf_expression,
            fd,
            paused: false,
            frames_read: 0,
        })
    }

    /// Attach pre-assembled classic-BPF bytecode (`SO_ATTACH_FILTER`). The
    /// raw expression string (if any) is kept only for `status()`.
    pub fn attach_filter(&mut self, program: &[SockFilter]) -> Result<()> {
        #[repr(C)]
        struct SockFprog {
            len: u16,
            filter: *const SockFilter,
        }
        let prog = SockFprog {
            len: program.len() as u16,
            filter: program.as_ptr(),
        };
        let rc = unsafe {
            libc::setsockopt(
                self.fd.get_ref().as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &prog as *const SockFprog as *const libc::c_void,
                std::mem::size_of::<SockFprog>() as u32,
            )
        };
        if rc < 0 {
            return Err(Error::Device {
                device: self.device.clone(),
                message: io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn bpf_expression(&self) -> Option<&str> {
        self.bpf_expression.as_deref()
    }

    pub fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read one frame, blocking asynchronously on socket readability.
    /// Returns `None` while paused (caller should poll again later).
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.paused {
            return Ok(None);
        }
        let mut buf = vec![0u8; 65536];
        loop {
            let mut guard = self.fd.readable_mut().await.map_err(Error::Io)?;
            let result = guard.try_io(|inner| {
                let rc = unsafe {
                    libc::recv(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        0,
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc as usize)
                }
            });
            match result {
                Ok(Ok(len)) => {
                    buf.truncate(len);
                    self.frames_read += 1;
                    return Ok(Some(buf));
                }
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sock_filter_is_c_layout_compatible() {
        assert_eq!(std::mem::size_of::<SockFilter>(), 8);
    }
}

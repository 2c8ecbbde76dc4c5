//! BCM socket endpoint
//!
//! A `CAN_BCM` datagram socket connected with interface index 0, so one
//! socket can schedule jobs on any CAN interface. The target interface is
//! passed to `sendto` per operation and reported back by `recvfrom`.

use std::io;
use std::mem::{self, size_of};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;

use crate::bcm::{BcmDelivery, BcmMessage, BcmOperation};
use crate::endpoint::{EndpointFactory, SchedulingEndpoint};
use crate::error::BcmError;

const BCM_MESSAGE_LEN: usize = size_of::<BcmMessage>();

fn can_address(ifindex: u32) -> libc::sockaddr_can {
    // SAFETY: sockaddr_can is plain old data; all-zero is a valid value
    let mut addr: libc::sockaddr_can = unsafe { mem::zeroed() };
    addr.can_family = libc::AF_CAN as libc::sa_family_t;
    addr.can_ifindex = ifindex as libc::c_int;
    addr
}

/// Unbound BCM socket registered with the tokio reactor
pub struct BcmSocket {
    fd: AsyncFd<OwnedFd>,
}

impl BcmSocket {
    /// Open and connect a BCM socket. Must be called inside a tokio runtime.
    pub fn open() -> Result<Self, BcmError> {
        // SAFETY: plain socket(2) call; the result is checked below
        let raw = unsafe {
            libc::socket(
                libc::PF_CAN,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::CAN_BCM,
            )
        };
        if raw < 0 {
            return Err(BcmError::Open(io::Error::last_os_error()));
        }
        // SAFETY: raw is a freshly created descriptor nobody else owns
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = can_address(0);
        // SAFETY: addr is a valid sockaddr_can of the given length
        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(BcmError::Connect(io::Error::last_os_error()));
        }

        let fd = AsyncFd::new(fd).map_err(BcmError::Open)?;
        tracing::debug!(fd = raw, "BCM socket connected");
        Ok(Self { fd })
    }

    fn recv_from(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, u32)> {
        let mut addr = can_address(0);
        let mut addr_len = size_of::<libc::sockaddr_can>() as libc::socklen_t;
        // SAFETY: buf and addr are valid for writes of the lengths passed
        let n = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut libc::sockaddr_can as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((n as usize, addr.can_ifindex as u32))
    }
}

#[async_trait]
impl SchedulingEndpoint for BcmSocket {
    fn dispatch(&self, ifindex: u32, op: &BcmOperation) -> Result<(), BcmError> {
        let msg = op.to_raw();
        let addr = can_address(ifindex);
        // SAFETY: msg and addr are repr(C) values living for the whole call
        let n = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                &msg as *const BcmMessage as *const libc::c_void,
                BCM_MESSAGE_LEN,
                0,
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if n < 0 {
            return Err(BcmError::Send(io::Error::last_os_error()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<BcmDelivery, BcmError> {
        let mut buf = [0u8; BCM_MESSAGE_LEN];
        loop {
            let mut guard = self.fd.readable().await.map_err(BcmError::Receive)?;
            match guard.try_io(|inner| Self::recv_from(inner.as_raw_fd(), &mut buf)) {
                Ok(Ok((0, _))) => return Err(BcmError::Closed),
                Ok(Ok((n, ifindex))) => return BcmDelivery::decode(ifindex, &buf[..n]),
                Ok(Err(e)) => return Err(BcmError::Receive(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Opens one [`BcmSocket`] per bridged connection
#[derive(Debug, Default, Clone, Copy)]
pub struct BcmEndpointFactory;

impl EndpointFactory for BcmEndpointFactory {
    fn open(&self) -> Result<Box<dyn SchedulingEndpoint>, BcmError> {
        Ok(Box::new(BcmSocket::open()?))
    }
}

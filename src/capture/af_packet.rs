//! AF_PACKET raw sockets on host interfaces

use super::{Backend, Link, LinkControl, RxInfo};
use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;

/// Every EtherType, in network order as the socket API expects
const ETH_P_ALL_BE: u16 = (libc::ETH_P_ALL as u16).to_be();

/// Map a libc return value to `io::Result`
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_len(ret: libc::ssize_t) -> io::Result<usize> {
    usize::try_from(ret).map_err(|_| io::Error::last_os_error())
}

/// Raw socket bound to one interface, in promiscuous mode while open
pub struct AfPacketSocket {
    fd: AsyncFd<OwnedFd>,
    ifindex: i32,
    promisc: AtomicBool,
}

impl AfPacketSocket {
    pub fn bind(ifname: &str) -> Result<Self> {
        // SAFETY: plain socket(2); ownership of the new descriptor moves into OwnedFd
        let fd = unsafe {
            let raw = cvt(libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                i32::from(ETH_P_ALL_BE),
            ))?;
            OwnedFd::from_raw_fd(raw)
        };

        let ifindex = interface_index(fd.as_raw_fd(), ifname)?;

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETH_P_ALL_BE;
        addr.sll_ifindex = ifindex;
        // SAFETY: addr is a fully initialized sockaddr_ll of the size passed
        cvt(unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        })?;

        // A switch port must see frames for every destination
        set_promisc(fd.as_raw_fd(), ifindex, true)?;

        Ok(Self {
            fd: AsyncFd::new(fd)?,
            ifindex,
            promisc: AtomicBool::new(true),
        })
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }

    /// Frames this socket transmitted come back from the kernel as
    /// `PACKET_OUTGOING` and are skipped, so the switch never re-ingests
    /// its own output. `MSG_TRUNC` makes the kernel report the full frame
    /// length, so an oversized frame is flagged rather than silently cut.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        loop {
            let mut guard = self.fd.readable().await?;
            let received = guard.try_io(|fd| {
                let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
                let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                // SAFETY: buf and from outlive the call, lengths match
                let n = unsafe {
                    libc::recvfrom(
                        fd.as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        libc::MSG_TRUNC,
                        &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                        &mut from_len,
                    )
                };
                cvt_len(n).map(|len| (len, from.sll_pkttype))
            });

            match received {
                Ok(Ok((_, kind))) if kind == libc::PACKET_OUTGOING as u8 => continue,
                Ok(Ok((len, _))) => {
                    return Ok(RxInfo {
                        len: len.min(buf.len()),
                        truncated: len > buf.len(),
                    })
                }
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            let sent = guard.try_io(|fd| {
                // SAFETY: buf outlives the call
                cvt_len(unsafe { libc::send(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), 0) })
            });
            match sent {
                Ok(result) => return result.map_err(Error::Io),
                Err(_would_block) => continue,
            }
        }
    }
}

fn interface_index(fd: RawFd, ifname: &str) -> Result<i32> {
    let not_found = || Error::InterfaceNotFound {
        name: ifname.to_string(),
    };
    let name = CString::new(ifname).map_err(|_| not_found())?;

    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    let bytes = name.as_bytes_with_nul();
    if bytes.len() > ifr.ifr_name.len() {
        return Err(not_found());
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: SIOCGIFINDEX reads ifr_name and writes ifr_ifindex
    cvt(unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) }).map_err(|_| not_found())?;
    Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
}

fn set_promisc(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
    let mreq = libc::packet_mreq {
        mr_ifindex: ifindex,
        mr_type: libc::PACKET_MR_PROMISC as u16,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    let option = match enable {
        true => libc::PACKET_ADD_MEMBERSHIP,
        false => libc::PACKET_DROP_MEMBERSHIP,
    };

    // SAFETY: mreq is a valid packet_mreq of the size passed
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            option,
            &mreq as *const libc::packet_mreq as *const libc::c_void,
            mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        // The descriptor itself is closed by OwnedFd
        let _ = LinkControl::close(self);
    }
}

impl LinkControl for AfPacketSocket {
    /// Leaves promiscuous mode; the descriptor closes once both port loops release it.
    fn close(&self) -> Result<()> {
        if self.promisc.swap(false, Ordering::AcqRel) {
            set_promisc(self.fd.get_ref().as_raw_fd(), self.ifindex, false)?;
        }
        Ok(())
    }
}

impl Link for AfPacketSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        AfPacketSocket::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        AfPacketSocket::send(self, buf).await
    }
}

/// Opens host interfaces by name
#[derive(Debug, Default, Clone, Copy)]
pub struct AfPacketBackend;

impl Backend for AfPacketBackend {
    type Link = AfPacketSocket;

    fn open(&self, name: &str) -> Result<Arc<AfPacketSocket>> {
        AfPacketSocket::bind(name).map(Arc::new)
    }
}

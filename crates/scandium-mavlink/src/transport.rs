//! Byte transports carrying encoded MAVLink frames.
//!
//! The tick loop owns one handle and only ever sends; the heartbeat task owns
//! a clone and does all the receiving.

use crate::error::TransportError;
use crate::messages::{decode_frame, FrameSplitter};
use mavlink::common::MavMessage;
use mavlink::MavHeader;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Longest a stream `recv` waits on a silent line.
pub const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(50);

pub trait Transport: Send {
    /// Write one complete frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read whatever bytes are available, `None` when there are none.
    ///
    /// Non-blocking for sockets and memory; stream transports may wait up to
    /// their read timeout.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError>;

    /// A second handle onto the same link, for the heartbeat task.
    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError>;

    fn describe(&self) -> String;
}

/// Last datagram source seen by a listening socket, shared between clones.
///
/// IPv4 only, packed as `1 << 48 | ip << 16 | port` so it fits one atomic.
#[derive(Debug, Default)]
struct PeerSlot(AtomicU64);

impl PeerSlot {
    fn store(&self, addr: SocketAddrV4) {
        let packed = 1u64 << 48 | u64::from(u32::from(*addr.ip())) << 16 | u64::from(addr.port());
        self.0.store(packed, Ordering::Release);
    }

    fn load(&self) -> Option<SocketAddrV4> {
        let packed = self.0.load(Ordering::Acquire);
        if packed == 0 {
            return None;
        }
        let ip = Ipv4Addr::from((packed >> 16) as u32);
        Some(SocketAddrV4::new(ip, packed as u16))
    }
}

#[derive(Debug)]
enum UdpPeer {
    /// Fixed remote, like `udpout:`.
    Fixed(SocketAddr),
    /// Reply to whoever spoke last, like `udpin:`.
    Learned(Arc<PeerSlot>),
}

/// Non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: UdpPeer,
}

impl UdpTransport {
    /// Send to `remote` from an ephemeral local port.
    pub fn connect(remote: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let remote = remote
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;
        let local: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        log::info!("mavlink udp: sending to {}", remote);
        Ok(Self {
            socket,
            peer: UdpPeer::Fixed(remote),
        })
    }

    /// Listen on `local` and answer the most recent sender.
    pub fn listen(local: SocketAddrV4) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        log::info!("mavlink udp: listening on {}", local);
        Ok(Self {
            socket,
            peer: UdpPeer::Learned(Arc::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn peer(&self) -> Option<SocketAddr> {
        match &self.peer {
            UdpPeer::Fixed(addr) => Some(*addr),
            UdpPeer::Learned(slot) => slot.load().map(SocketAddr::V4),
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let peer = self.peer().ok_or(TransportError::NoPeer)?;
        match self.socket.send_to(frame, peer) {
            Ok(_) => Ok(()),
            // a full socket buffer drops the frame, the next one carries fresher data
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => {
                if let (UdpPeer::Learned(slot), SocketAddr::V4(v4)) = (&self.peer, from) {
                    slot.store(v4);
                }
                Ok(Some(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        let peer = match &self.peer {
            UdpPeer::Fixed(addr) => UdpPeer::Fixed(*addr),
            UdpPeer::Learned(slot) => UdpPeer::Learned(Arc::clone(slot)),
        };
        Ok(Box::new(UdpTransport {
            socket: self.socket.try_clone()?,
            peer,
        }))
    }

    fn describe(&self) -> String {
        match self.peer() {
            Some(p) => format!("udp:{}", p),
            None => "udp:(awaiting peer)".to_string(),
        }
    }
}

/// A byte stream that can be duplicated into a second handle.
pub trait DuplexStream: Read + Write + Send + 'static {
    fn try_clone_stream(&self) -> io::Result<Self>
    where
        Self: Sized;
}

impl DuplexStream for Box<dyn SerialPort> {
    fn try_clone_stream(&self) -> io::Result<Self> {
        Ok((**self).try_clone()?)
    }
}

impl DuplexStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }
}

/// Serial devices and TCP links. Reads wait at most
/// [`STREAM_READ_TIMEOUT`], so a silent line never stalls the caller.
pub struct StreamTransport<S> {
    stream: S,
    label: String,
}

impl<S: DuplexStream> StreamTransport<S> {
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            label: label.into(),
        }
    }
}

pub type SerialTransport = StreamTransport<Box<dyn SerialPort>>;

impl StreamTransport<Box<dyn SerialPort>> {
    /// Open `device` raw at 8N1, no flow control, `baud` bits per second.
    pub fn open_serial(device: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(STREAM_READ_TIMEOUT)
            .open()?;
        let label = format!("serial:{}@{}", device, baud);
        log::info!("mavlink {}", label);
        Ok(Self::new(port, label))
    }
}

impl StreamTransport<TcpStream> {
    pub fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(STREAM_READ_TIMEOUT))?;
        let label = format!("tcp:{}", stream.peer_addr()?);
        log::info!("mavlink {}", label);
        Ok(Self::new(stream, label))
    }
}

impl<S: DuplexStream> Transport for StreamTransport<S> {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        match self.stream.read(buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(StreamTransport {
            stream: self.stream.try_clone_stream()?,
            label: self.label.clone(),
        }))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[derive(Debug, Default)]
struct MemoryLink {
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    fail_sends: bool,
    fail_recvs: bool,
}

/// In-process link for simulation and tests. Clones share one buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryLink>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryLink) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Queue bytes for the next `recv`.
    pub fn push_inbound(&self, bytes: Vec<u8>) {
        self.with(|l| l.inbound.push_back(bytes));
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.with(|l| l.sent.clone())
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        self.with(|l| std::mem::take(&mut l.sent))
    }

    /// Sent frames decoded, skipping anything that does not parse.
    pub fn sent_messages(&self) -> Vec<(MavHeader, MavMessage)> {
        let mut splitter = FrameSplitter::new();
        for frame in self.sent() {
            splitter.push(&frame);
        }
        std::iter::from_fn(|| splitter.next_frame())
            .filter_map(|f| decode_frame(&f).ok())
            .collect()
    }

    /// Make every subsequent `send` fail, to exercise error paths.
    pub fn set_fail_sends(&self, fail: bool) {
        self.with(|l| l.fail_sends = fail);
    }

    /// Make every subsequent `recv` fail.
    pub fn set_fail_recvs(&self, fail: bool) {
        self.with(|l| l.fail_recvs = fail);
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.with(|l| {
            if l.fail_sends {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "memory link closed",
                )));
            }
            l.sent.push(frame.to_vec());
            Ok(())
        })
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        self.with(|l| {
            if l.fail_recvs {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "memory link reset",
                )));
            }
            let Some(mut bytes) = l.inbound.pop_front() else {
                return Ok(None);
            };
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            if n < bytes.len() {
                l.inbound.push_front(bytes.split_off(n));
            }
            Ok(Some(n))
        })
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

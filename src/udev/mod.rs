//! Device-event responder.
//!
//! Reads kernel uevents from a netlink socket, dispatches them to a
//! bounded worker pool that maintains /dev, and answers idle queries on
//! the bus.

pub mod event;
pub mod node;
pub mod pool;
pub mod service;
pub mod trigger;

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use nix::sys::socket::{
    self, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
};

use event::Uevent;
use pool::Pool;

/// Kernel multicast group for uevents.
const UEVENT_GROUP: u32 = 1;
const RECV_BUFFER_SIZE: usize = 8 * 1024 * 1024;
const RECV_CHUNK: usize = 64 * 1024;
const QUEUE_DEPTH: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum UdevError {
    #[error("netlink socket: {0}")]
    Socket(#[source] nix::Error),

    #[error("receive loop stopped: {0}")]
    Receive(#[from] tokio::task::JoinError),
}

/// Open the kernel uevent netlink socket: group 1, bound to our pid, with
/// a receive buffer large enough to absorb trigger storms.
fn open_uevent_socket() -> Result<OwnedFd, nix::Error> {
    let fd = socket::socket(
        AddressFamily::Netlink,
        SockType::Datagram,
        SockFlag::empty(),
        SockProtocol::NetlinkKObjectUEvent,
    )?;
    socket::setsockopt(&fd, socket::sockopt::RcvBuf, &RECV_BUFFER_SIZE)?;
    socket::bind(
        fd.as_raw_fd(),
        &NetlinkAddr::new(std::process::id(), UEVENT_GROUP),
    )?;
    Ok(fd)
}

/// Listen for uevents until the process is stopped. With `trigger`,
/// additionally replay events for devices that are already present.
pub async fn listen(trigger: bool) -> Result<(), UdevError> {
    let fd = open_uevent_socket().map_err(UdevError::Socket)?;

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let pool = Pool::new(workers, QUEUE_DEPTH);
    log::info!("uevent pool: {} workers, queue depth {}", workers, QUEUE_DEPTH);

    let endpoint_pool = pool.clone();
    tokio::spawn(async move {
        loop {
            match service::serve(&endpoint_pool).await {
                Ok(()) => break,
                Err(e) => {
                    log::warn!("udev endpoint lost: {}; reconnecting", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    });

    if trigger {
        tokio::task::spawn_blocking(trigger::replay_sys_events);
    }

    let reader = tokio::task::spawn_blocking(move || recv_loop(fd, pool));
    reader.await?;
    Ok(())
}

/// Blocking receive loop: parse each datagram and hand it to the pool.
/// Receive errors are logged and the loop continues.
fn recv_loop(fd: OwnedFd, pool: Pool) {
    let mut buf = vec![0u8; RECV_CHUNK];
    loop {
        let n = match socket::recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty()) {
            Ok(n) => n,
            Err(e) => {
                log::error!("failed to receive uevent: {}", e);
                continue;
            }
        };

        let event = Uevent::parse(&buf[..n]);
        log::debug!(
            "uevent: action={} subsystem={} device={}",
            event.action,
            event.subsystem,
            event.device
        );

        pool.submit_blocking(move || {
            if let Err(e) = node::apply(&event) {
                log::error!("uevent {}: {}", event.device, e);
            }
        });
    }
}

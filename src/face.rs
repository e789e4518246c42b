//! The `Face` collaborator: send an Interest, get back a Data or a Nack.
//!
//! No counterpart in the source (which binds to a local NDN forwarder via
//! `ndn-cxx::Face`); grounded on the teacher's `segment_loop`
//! (`src/lib.rs`) for the "one task reads datagrams, demultiplexes by key,
//! wakes the right waiter" shape, adapted from blocking `poll`+`Tun::read`
//! to `tokio::net::UdpSocket`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::debug;

use crate::types::{Data, Interest, Name, NackReason};
use crate::wire::Frame;

/// Outcome of a single `express_interest` call: either the matching Data or
/// a link-level Nack. Timeouts are not a `Reply` variant — the caller wraps
/// `express_interest` in `tokio::time::timeout` and treats elapsed as the
/// timeout outcome, mirroring the source's Interest-lifetime-driven timer.
#[derive(Debug, Clone)]
pub enum Reply {
    Data(Data),
    Nack(NackReason),
}

#[async_trait(?Send)]
pub trait Face {
    async fn express_interest(&self, interest: Interest) -> std::io::Result<Reply>;

    /// Deregisters a pending Interest without sending anything further.
    fn remove_pending_interest(&self, name: &Name);
}

struct PendingGuard {
    name: Name,
    pending: Rc<RefCell<HashMap<Name, oneshot::Sender<Reply>>>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.borrow_mut().remove(&self.name);
    }
}

/// A `Face` backed by a connected UDP socket to a single remote endpoint,
/// used by the binary when no in-process test producer is wired in.
pub struct UdpFace {
    socket: Rc<UdpSocket>,
    pending: Rc<RefCell<HashMap<Name, oneshot::Sender<Reply>>>>,
    _recv_task: tokio::task::JoinHandle<()>,
}

impl UdpFace {
    pub async fn connect(bind: SocketAddr, remote: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(remote).await?;
        let socket = Rc::new(socket);
        let pending: Rc<RefCell<HashMap<Name, oneshot::Sender<Reply>>>> =
            Rc::new(RefCell::new(HashMap::new()));

        let recv_socket = socket.clone();
        let recv_pending = pending.clone();
        let recv_task = tokio::task::spawn_local(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = match recv_socket.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(err) => {
                        debug!(error = %err, "face receive loop stopped");
                        return;
                    }
                };
                let frame = match Frame::decode(&buf[..n]) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(error = %err, "dropping malformed frame");
                        continue;
                    }
                };
                let (name, reply) = match frame {
                    Frame::Data(data) => {
                        debug!(name = %data.name, "data_received");
                        (data.name.clone(), Reply::Data(data))
                    }
                    Frame::Nack { interest, reason } => {
                        debug!(name = %interest.name, reason = %reason, "interest_nack");
                        (interest.name.clone(), Reply::Nack(reason))
                    }
                    Frame::Interest(_) => continue,
                };
                if let Some(tx) = recv_pending.borrow_mut().remove(&name) {
                    let _ = tx.send(reply);
                }
            }
        });

        Ok(UdpFace {
            socket,
            pending,
            _recv_task: recv_task,
        })
    }
}

#[async_trait(?Send)]
impl Face for UdpFace {
    async fn express_interest(&self, interest: Interest) -> std::io::Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let name = interest.name.clone();
        self.pending.borrow_mut().insert(name.clone(), tx);
        let _guard = PendingGuard {
            name: name.clone(),
            pending: self.pending.clone(),
        };

        debug!(name = %name, "interest_sent");
        let bytes = Frame::Interest(interest)
            .encode()
            .expect("Interest always encodes");
        self.socket.send(&bytes).await?;

        match rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => {
                // Sender dropped without a reply: the socket task exited.
                std::future::pending().await
            }
        }
    }

    fn remove_pending_interest(&self, name: &Name) {
        self.pending.borrow_mut().remove(name);
    }
}

/// An in-process `Face` wired directly to a test producer, used by the
/// integration tests (§8 S7) so they never open a real socket.
pub struct MockFace {
    pending: Rc<RefCell<HashMap<Name, oneshot::Sender<Reply>>>>,
    outbound: tokio::sync::mpsc::UnboundedSender<Interest>,
}

impl MockFace {
    pub fn new(outbound: tokio::sync::mpsc::UnboundedSender<Interest>) -> Self {
        MockFace {
            pending: Rc::new(RefCell::new(HashMap::new())),
            outbound,
        }
    }

    /// Delivers a reply to whichever `express_interest` call is pending for
    /// this name, if any (late or unmatched replies are dropped silently,
    /// matching a Face with no registration left for that name).
    pub fn deliver(&self, name: &Name, reply: Reply) {
        if let Some(tx) = self.pending.borrow_mut().remove(name) {
            let _ = tx.send(reply);
        }
    }
}

#[async_trait(?Send)]
impl Face for MockFace {
    async fn express_interest(&self, interest: Interest) -> std::io::Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let name = interest.name.clone();
        self.pending.borrow_mut().insert(name.clone(), tx);
        let _guard = PendingGuard {
            name: name.clone(),
            pending: self.pending.clone(),
        };
        let _ = self.outbound.send(interest);
        match rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => std::future::pending().await,
        }
    }

    fn remove_pending_interest(&self, name: &Name) {
        self.pending.borrow_mut().remove(name);
    }
}

//! Bus broker: routes frames between connections and the objects they
//! register.
//!
//! One reader task per connection; writes to a connection are serialized
//! by its own mutex, and forwarding takes the destination's write lock.
//! The broker never inspects payloads except for Register/Unregister.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};

use super::frame::{
    self, FrameError, Message, BUS_OBJECT_ID, EVENT_ERROR, EVENT_PING, EVENT_REGISTER,
    EVENT_REPLY, EVENT_UNREGISTER,
};

type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Default)]
struct Tables {
    /// Object id -> owning client id.
    objects: HashMap<u32, u32>,
    /// Client id -> write half of its socket.
    clients: HashMap<u32, Writer>,
}

#[derive(Default)]
pub struct Broker {
    tables: Mutex<Tables>,
}

/// Prepare a broker socket: create the runtime directory and unlink any
/// stale socket file left by a previous run.
pub fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Removes the client and everything it registered, on every exit path
/// out of the connection handler.
struct ConnectionGuard<'a> {
    broker: &'a Broker,
    client_id: u32,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.broker.drop_client(self.client_id);
        log::debug!("client {} disconnected", self.client_id);
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept loop. Runs until the listener fails fatally.
    pub async fn run(self: Arc<Self>, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("accept error: {}", e);
                    continue;
                }
            };

            let broker = Arc::clone(&self);
            tokio::spawn(async move { broker.handle_connection(stream).await });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let (mut reader, writer) = stream.into_split();
        let writer: Writer = Arc::new(tokio::sync::Mutex::new(writer));

        let client_id = self.admit(Arc::clone(&writer));
        let _guard = ConnectionGuard {
            broker: self.as_ref(),
            client_id,
        };

        // Hello: an unsolicited Reply whose destination carries the
        // assigned client id.
        let hello = Message {
            sender: BUS_OBJECT_ID,
            destination: client_id,
            event: EVENT_REPLY,
            payload: Vec::new(),
        };
        if write_to(&writer, &hello).await.is_err() {
            return;
        }
        log::debug!("client {} connected", client_id);

        loop {
            let message = match frame::read_frame(&mut reader).await {
                Ok(m) => m,
                Err(FrameError::Closed) => return,
                Err(e) => {
                    log::warn!("client {}: framing error: {}", client_id, e);
                    return;
                }
            };

            if message.sender != client_id {
                self.error_to(
                    &writer,
                    client_id,
                    format!("sender {} does not match connection id", message.sender),
                )
                .await;
                continue;
            }

            if message.destination == BUS_OBJECT_ID {
                self.handle_bus_event(&writer, client_id, message).await;
            } else {
                self.forward(&writer, client_id, message).await;
            }
        }
    }

    /// Assign a fresh non-zero client id and record the connection.
    fn admit(&self, writer: Writer) -> u32 {
        let mut tables = self.tables();
        let mut rng = rand::thread_rng();
        loop {
            let id: u32 = rng.gen();
            if id == BUS_OBJECT_ID || tables.clients.contains_key(&id) {
                continue;
            }
            tables.clients.insert(id, writer);
            return id;
        }
    }

    fn drop_client(&self, client_id: u32) {
        let mut tables = self.tables();
        tables.clients.remove(&client_id);
        tables.objects.retain(|_, owner| *owner != client_id);
    }

    async fn handle_bus_event(&self, writer: &Writer, client_id: u32, message: Message) {
        match message.event {
            EVENT_REGISTER => {
                let Some(object) = object_id_payload(&message.payload) else {
                    self.error_to(writer, client_id, "invalid register payload".into())
                        .await;
                    return;
                };

                let taken = {
                    let mut tables = self.tables();
                    match tables.objects.entry(object) {
                        Entry::Occupied(_) => true,
                        Entry::Vacant(slot) => {
                            slot.insert(client_id);
                            false
                        }
                    }
                };

                if taken {
                    self.error_to(
                        writer,
                        client_id,
                        format!("object {} already registered", object),
                    )
                    .await;
                } else {
                    log::info!("client {} registered object {}", client_id, object);
                }
            }

            EVENT_UNREGISTER => {
                let Some(object) = object_id_payload(&message.payload) else {
                    self.error_to(writer, client_id, "invalid unregister payload".into())
                        .await;
                    return;
                };

                let mut tables = self.tables();
                if tables.objects.get(&object) == Some(&client_id) {
                    tables.objects.remove(&object);
                    log::info!("client {} unregistered object {}", client_id, object);
                }
            }

            EVENT_PING => {
                let pong = Message {
                    sender: BUS_OBJECT_ID,
                    destination: client_id,
                    event: EVENT_REPLY,
                    payload: b"pong".to_vec(),
                };
                if let Err(e) = write_to(writer, &pong).await {
                    log::debug!("client {}: failed to answer ping: {}", client_id, e);
                }
            }

            other => {
                self.error_to(writer, client_id, format!("unknown bus event {}", other))
                    .await;
            }
        }
    }

    /// Deliver a frame to its destination: registered objects first, then
    /// client ids. An unknown destination earns the sender an Error frame.
    async fn forward(&self, source: &Writer, client_id: u32, message: Message) {
        let destination = {
            let tables = self.tables();
            tables
                .objects
                .get(&message.destination)
                .and_then(|owner| tables.clients.get(owner))
                .or_else(|| tables.clients.get(&message.destination))
                .cloned()
        };

        let Some(destination) = destination else {
            self.error_to(
                source,
                client_id,
                format!("unknown object {}", message.destination),
            )
            .await;
            return;
        };

        if let Err(e) = write_to(&destination, &message).await {
            self.error_to(source, client_id, format!("write failed: {}", e))
                .await;
        }
    }

    async fn error_to(&self, writer: &Writer, destination: u32, text: String) {
        let message = Message {
            sender: BUS_OBJECT_ID,
            destination,
            event: EVENT_ERROR,
            payload: text.into_bytes(),
        };
        if let Err(e) = write_to(writer, &message).await {
            log::debug!("failed to deliver error reply: {}", e);
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn write_to(writer: &Writer, message: &Message) -> Result<(), FrameError> {
    let mut writer = writer.lock().await;
    frame::write_frame(&mut *writer, message).await
}

fn object_id_payload(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

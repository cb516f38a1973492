//! Per-process bus connection.

use std::collections::HashMap;
use std::path::Path;

use tokio::net::UnixStream;

use super::frame::{
    self, session_bus_path, FrameError, Message, BUS_OBJECT_ID, EVENT_ERROR, EVENT_REGISTER,
    EVENT_REPLY, EVENT_UNREGISTER, SYSTEM_BUS_PATH,
};

type Callback = Box<dyn FnMut(&[u8]) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to bus: {0}")]
    Connect(#[source] std::io::Error),

    /// The first frame after connecting was not the broker hello.
    #[error("failed to get connection id")]
    BadHello,

    /// The peer answered with an Error frame; the message is its payload.
    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A connection to the bus.
///
/// The broker assigns a client id on connect and delivers it in an
/// unsolicited Reply from object 0; every frame sent afterwards carries
/// that id as its sender. A connection supports one outstanding [`call`]
/// at a time because replies are correlated by arrival order; callers
/// that need concurrent calls open additional connections.
///
/// [`call`]: Connection::call
pub struct Connection {
    id: u32,
    stream: UnixStream,
    callbacks: HashMap<u16, Callback>,
}

impl Connection {
    /// Connect to a broker socket and read the assigned client id.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let mut stream = UnixStream::connect(path.as_ref())
            .await
            .map_err(BusError::Connect)?;

        let hello = frame::read_frame(&mut stream).await?;
        if hello.sender != BUS_OBJECT_ID || hello.event != EVENT_REPLY {
            return Err(BusError::BadHello);
        }

        Ok(Self {
            id: hello.destination,
            stream,
            callbacks: HashMap::new(),
        })
    }

    pub async fn connect_system() -> Result<Self, BusError> {
        Self::connect(SYSTEM_BUS_PATH).await
    }

    pub async fn connect_session() -> Result<Self, BusError> {
        Self::connect(session_bus_path()).await
    }

    /// The client id the broker assigned to this connection.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Claim an object id on the bus. The broker answers only on failure,
    /// with an Error frame that the next receive surfaces.
    pub async fn register(&mut self, object: u32) -> Result<(), BusError> {
        self.send(Message {
            destination: BUS_OBJECT_ID,
            event: EVENT_REGISTER,
            payload: object.to_le_bytes().to_vec(),
            ..Default::default()
        })
        .await
    }

    /// Release an object id. Silent if this connection does not own it.
    pub async fn unregister(&mut self, object: u32) -> Result<(), BusError> {
        self.send(Message {
            destination: BUS_OBJECT_ID,
            event: EVENT_UNREGISTER,
            payload: object.to_le_bytes().to_vec(),
            ..Default::default()
        })
        .await
    }

    /// Send a request and wait for the single reply frame. An Error frame
    /// becomes [`BusError::Remote`] carrying the payload text.
    pub async fn call(
        &mut self,
        object: u32,
        event: u16,
        payload: &[u8],
    ) -> Result<Vec<u8>, BusError> {
        self.send(Message {
            destination: object,
            event,
            payload: payload.to_vec(),
            ..Default::default()
        })
        .await?;

        let reply = frame::read_frame(&mut self.stream).await?;
        if reply.event == EVENT_ERROR {
            return Err(BusError::Remote(
                String::from_utf8_lossy(&reply.payload).into_owned(),
            ));
        }
        Ok(reply.payload)
    }

    /// Raw frame write. The sender field is always this connection's id.
    pub async fn send(&mut self, mut message: Message) -> Result<(), BusError> {
        message.sender = self.id;
        frame::write_frame(&mut self.stream, &message).await?;
        Ok(())
    }

    /// Raw frame read.
    pub async fn receive(&mut self) -> Result<Message, BusError> {
        Ok(frame::read_frame(&mut self.stream).await?)
    }

    /// Install a handler for an event code, used by [`listen`].
    ///
    /// [`listen`]: Connection::listen
    pub fn bind(&mut self, event: u16, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.callbacks.insert(event, Box::new(callback));
    }

    /// Receive frames until the peer closes, dispatching each to the
    /// callback bound to its event code. Frames without a handler are
    /// discarded.
    pub async fn listen(&mut self) -> Result<(), BusError> {
        loop {
            let message = match frame::read_frame(&mut self.stream).await {
                Ok(m) => m,
                Err(FrameError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            if let Some(callback) = self.callbacks.get_mut(&message.event) {
                callback(&message.payload);
            }
        }
    }
}

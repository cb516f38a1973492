//! Typed client wrappers for the well-known bus objects.

use crate::bus::codec::{decode, encode, CodecError};
use crate::bus::{BusError, Connection};

/// Object id of the service supervisor.
pub const INIT_OBJECT_ID: u32 = 1;
pub const INIT_LIST_EVENT: u16 = 2;
pub const INIT_STATUS_EVENT: u16 = 3;

/// Object id of the device-event responder.
pub const UDEV_OBJECT_ID: u32 = 2;
pub const UDEV_IDLE_EVENT: u16 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("malformed reply: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed reply: wrong payload size")]
    BadReply,
}

/// Client for the supervisor's list/status endpoint.
pub struct InitApi {
    conn: Connection,
}

impl InitApi {
    pub async fn connect_system() -> Result<Self, ApiError> {
        Ok(Self {
            conn: Connection::connect_system().await?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Names of all known services. The filter is carried on the wire but
    /// not yet applied by the supervisor.
    pub async fn list(&mut self, filter: &str) -> Result<Vec<String>, ApiError> {
        let reply = self
            .conn
            .call(INIT_OBJECT_ID, INIT_LIST_EVENT, &encode(filter))
            .await?;
        Ok(decode(&reply)?)
    }

    /// State string for one service; `"unknown"` when no such service.
    pub async fn status(&mut self, service: &str) -> Result<String, ApiError> {
        let reply = self
            .conn
            .call(INIT_OBJECT_ID, INIT_STATUS_EVENT, &encode(service))
            .await?;
        Ok(decode(&reply)?)
    }
}

/// Client for the device-event responder.
pub struct UdevApi {
    conn: Connection,
}

impl UdevApi {
    pub async fn connect_system() -> Result<Self, ApiError> {
        Ok(Self {
            conn: Connection::connect_system().await?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Whether the responder's worker pool has drained.
    pub async fn is_idle(&mut self) -> Result<bool, ApiError> {
        let reply = self.conn.call(UDEV_OBJECT_ID, UDEV_IDLE_EVENT, &[]).await?;
        let word: [u8; 4] = reply.as_slice().try_into().map_err(|_| ApiError::BadReply)?;
        Ok(u32::from_le_bytes(word) == 1)
    }
}

//! The responder's bus endpoint: object 2, idle queries.

use std::path::Path;

use crate::api::{UDEV_IDLE_EVENT, UDEV_OBJECT_ID};
use crate::bus::frame::{FrameError, Message, EVENT_ERROR, EVENT_REPLY, SYSTEM_BUS_PATH};
use crate::bus::{BusError, Connection};

use super::pool::Pool;

/// Register object 2 and answer idle queries until the bus connection
/// drops. Returns Ok on a clean close.
pub async fn serve(pool: &Pool) -> Result<(), BusError> {
    serve_at(SYSTEM_BUS_PATH, pool).await
}

/// [`serve`] against an explicit broker socket.
pub async fn serve_at(path: impl AsRef<Path>, pool: &Pool) -> Result<(), BusError> {
    let mut conn = Connection::connect(path).await?;
    conn.register(UDEV_OBJECT_ID).await?;

    loop {
        let request = match conn.receive().await {
            Ok(message) => message,
            Err(BusError::Frame(FrameError::Closed)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let reply = match request.event {
            UDEV_IDLE_EVENT => {
                let word: u32 = if pool.is_idle() { 1 } else { 0 };
                Message {
                    destination: request.sender,
                    event: EVENT_REPLY,
                    payload: word.to_le_bytes().to_vec(),
                    ..Default::default()
                }
            }
            other => Message {
                destination: request.sender,
                event: EVENT_ERROR,
                payload: format!("unknown event {}", other).into_bytes(),
                ..Default::default()
            },
        };

        conn.send(reply).await?;
    }
}

//! The supervisor's bus endpoint: object 1, list and status queries.

use std::path::Path;

use crate::api::{INIT_LIST_EVENT, INIT_OBJECT_ID, INIT_STATUS_EVENT};
use crate::bus::codec::{decode, encode};
use crate::bus::frame::{FrameError, Message, EVENT_ERROR, EVENT_REPLY, SYSTEM_BUS_PATH};
use crate::bus::{BusError, Connection};

use super::Supervisor;

/// Register object 1 and answer queries until the bus connection drops.
/// Returns Ok on a clean close so the caller can decide whether to
/// reconnect.
pub async fn serve(supervisor: &Supervisor) -> Result<(), BusError> {
    serve_at(SYSTEM_BUS_PATH, supervisor).await
}

/// [`serve`] against an explicit broker socket.
pub async fn serve_at(path: impl AsRef<Path>, supervisor: &Supervisor) -> Result<(), BusError> {
    let mut conn = Connection::connect(path).await?;
    conn.register(INIT_OBJECT_ID).await?;

    loop {
        let request = match conn.receive().await {
            Ok(message) => message,
            Err(BusError::Frame(FrameError::Closed)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let reply = match request.event {
            INIT_LIST_EVENT => {
                // The filter is accepted but not applied yet.
                let _filter: String = decode(&request.payload).unwrap_or_default();
                Message {
                    destination: request.sender,
                    event: EVENT_REPLY,
                    payload: encode(&supervisor.service_names()),
                    ..Default::default()
                }
            }

            INIT_STATUS_EVENT => match decode::<String>(&request.payload) {
                Ok(name) => Message {
                    destination: request.sender,
                    event: EVENT_REPLY,
                    payload: encode(supervisor.status_of(&name)),
                    ..Default::default()
                },
                Err(e) => Message {
                    destination: request.sender,
                    event: EVENT_ERROR,
                    payload: format!("bad status request: {}", e).into_bytes(),
                    ..Default::default()
                },
            },

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

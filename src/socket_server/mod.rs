//! Notification bus
//!
//! Keeps every live WebSocket subscriber in step with the environment index.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        NotificationBus                           │
//! │                                                                  │
//! │  Catalog::reindex ──► publish(snapshot)                          │
//! │                          │ encode {"id":-1,"result":...} once    │
//! │                          ▼                                       │
//! │                  watch::Sender<Option<Broadcast>>                │
//! │                          │                                       │
//! │        ┌─────────────────┼─────────────────┐                     │
//! │        ▼                 ▼                 ▼                     │
//! │   Subscription      Subscription      Subscription               │
//! │   (connection task) (connection task) (connection task)          │
//! │                                                                  │
//! │  members: Mutex<HashMap<ClientId, Member>>  (join / leave only)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON text frames; see [`protocol`].

pub mod bus;
pub mod connection;
pub mod protocol;

pub use bus::{Broadcast, ClientId, Member, NotificationBus, Subscription, DEFAULT_SEND_TIMEOUT};
pub use connection::{handle_connection, handle_request, serve_socket};
pub use protocol::{encode_broadcast, JsonError, Request, Response, BROADCAST_ID};

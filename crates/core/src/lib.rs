//! Durable Streams Server
//!
//! An append-only, offset-addressable stream service with live tailing,
//! layered over pluggable storage substrates.
//!
//! # Features
//!
//! - **Append-only streams**: create named streams and append bytes with
//!   guaranteed ordering; offsets encode both append count and byte position
//! - **Replay support**: read from any offset to catch up on missed data
//! - **Live tailing**: long-polling with configurable timeout, or continuous
//!   Server-Sent Events
//! - **TTL / expiration**: relative or absolute expiry with lazy cleanup
//! - **JSON mode**: JSON streams stitch items with a trailing-comma internal
//!   form and read back as one array
//! - **Writer coordination**: monotonic sequence tags reject duplicate writes
//! - **Pluggable substrates**: in-memory, embedded SQLite, Postgres, Redis,
//!   and object storage behind one [`store::StreamStore`] contract
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use durable_stream::{server, store::MemoryStreamStore, types::ServerOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ServerOptions {
//!         port: 4437,
//!         host: "127.0.0.1".to_string(),
//!         ..Default::default()
//!     };
//!     let store = Arc::new(MemoryStreamStore::new());
//!     server::start_server(options, store).await.unwrap();
//! }
//! ```
//!
//! # Protocol
//!
//! ## Creating a stream
//!
//! ```text
//! PUT /stream/my-events HTTP/1.1
//! Content-Type: application/json
//! Stream-TTL: 3600
//!
//! Response: 201 Created
//! Stream-Next-Offset: 0000000000000000_0000000000000000
//! ```
//!
//! ## Appending data
//!
//! ```text
//! POST /stream/my-events HTTP/1.1
//! Content-Type: application/json
//!
//! {"event": "user_created", "id": 123}
//!
//! Response: 200 OK
//! Stream-Next-Offset: 0000000000000001_0000000000000025
//! ```
//!
//! ## Reading data
//!
//! ```text
//! GET /stream/my-events?offset=-1 HTTP/1.1
//!
//! Response: 200 OK
//! Stream-Next-Offset: 0000000000000001_0000000000000025
//! Content-Type: application/json
//!
//! [{"event": "user_created", "id": 123}]
//! ```
//!
//! ## Long-polling
//!
//! ```text
//! GET /stream/my-events?offset=0000000000000001_0000000000000025&live=long-poll HTTP/1.1
//!
//! (waits up to 30 seconds for new data)
//!
//! Response: 204 No Content (if no new data)
//! Stream-Up-To-Date: true
//! ```
//!
//! ## Server-Sent Events
//!
//! ```text
//! GET /stream/my-events?offset=-1&live=sse HTTP/1.1
//! Accept: text/event-stream
//!
//! event: data
//! data: [{"event": "user_created", "id": 123}]
//!
//! event: control
//! data: {"streamNextOffset": "0000000000000001_0000000000000025", "upToDate": true}
//! ```

pub mod cursor;
pub mod error;
pub mod etag;
pub mod expiry;
pub mod json;
pub mod offset;
pub mod path_encoding;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use error::StoreError;
pub use offset::Offset;
pub use server::{AppState, create_router, start_server};
pub use store::{
    MemoryStreamStore, ObjectStreamStore, PostgresStreamStore, RedisStreamStore,
    SqliteStreamStore, StreamStore,
};
pub use types::{ReadResult, ServerOptions, StreamMessage, StreamMeta, WaitResult};

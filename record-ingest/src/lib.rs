//! Concurrent record-ingestion service.
//!
//! Clients open a TCP connection, send one `name;class;score` line, and get
//! back `OK` once the record is durably in `data/alunos.json`, or an `ERR:`
//! line when the request is invalid.
//!
//! - [`record`] decodes wire lines and encodes the JSON document.
//! - [`store`] owns the file and serializes appends behind one lock, writing
//!   through a staging file and an atomic rename.
//! - [`connection`] runs the per-connection read/decode/persist/reply cycle.
//! - [`server`] binds the listener, spawns a task per connection, and drains
//!   in-flight connections on shutdown.
//! - [`cli`] and [`client`] provide the `serve`, `submit`, and `list`
//!   commands.

pub mod cli;
pub mod client;
pub mod connection;
pub mod protocol;
pub mod record;
pub mod server;
pub mod store;

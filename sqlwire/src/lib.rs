//! Client side wire for a multiplexed SQL server.
//!
//! A [`SessionWire`] carries many concurrent requests over one link. Each
//! reply is routed back through the response box the request claimed. Query
//! results stream in as a named result set, read with a [`ResultSetWire`].
//! Records are decoded with [`ValueReader`].
//!
//! # Examples
//!
//! Statement:
//!
//! ```no_run
//! use sqlwire::SessionWire;
//!
//! # async fn app() -> sqlwire::Result<()> {
//! let wire = SessionWire::connect_env().await?;
//!
//! let response = wire.send(3, b"INSERT INTO foo VALUES (1)")?;
//! let payload = response.wait_for_main_response().await?;
//! # let _ = payload;
//!
//! wire.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Query:
//!
//! ```no_run
//! use sqlwire::{SessionWire, ValueReader};
//!
//! # async fn app() -> sqlwire::Result<()> {
//! let wire = SessionWire::connect("tcp://localhost:12345").await?;
//!
//! let (head, body) = wire.send_query(3, b"SELECT id FROM foo")?;
//! let name = head.get().await?;
//!
//! let mut result_set = wire.create_result_set_wire();
//! result_set.connect(std::str::from_utf8(&name)?)?;
//!
//! while let Some(record) = result_set.next_record().await? {
//!     let mut reader = ValueReader::new(record);
//!     let id = reader.read_int()?;
//! #   let _ = id;
//! }
//!
//! body.get().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod io;
mod ext;

// Encoding
pub mod value;

// Protocol
pub mod frame;
pub mod transport;

// Component
pub mod response;
pub mod result_set;
pub mod session;

pub mod error;

pub use error::{Error, ErrorKind, Result};
pub use response::{Distiller, FutureResponse, Response};
pub use result_set::ResultSetWire;
pub use session::{Config, SessionWire};
pub use value::{Value, ValueReader, ValueWriter};

//! splitstore - an extension-partitioned file store.
//!
//! A front-door node (`smain`) accepts every client command, keeps `.c`
//! files itself and routes `.txt` and `.pdf` files to two specialized nodes
//! (`stext`, `spdf`). Clients only ever talk to the front-door.

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod path;
pub mod protocol;
pub mod router;
pub mod server;
pub mod transport;

pub use config::ClusterConfig;
pub use error::{Result, StoreError};
pub use router::{NodeId, Router};

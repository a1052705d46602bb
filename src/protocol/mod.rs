//! Control-channel protocol shared by the front-door and specialized nodes.
//!
//! # Wire format
//!
//! ```text
//! command   = verb [SP args] LF
//! reply     = ("OK" | "ERR" | "DATA") SP len LF payload
//! body      = size LF ["ACK"] bytes        ; ACK on uploads only
//! ```
//!
//! A `DATA` reply is always followed by a body. Downloads to the client end
//! with one more `OK`/`ERR` reply confirming the transfer.

pub mod command;
pub mod framing;
pub mod response;
pub mod session;

pub use command::{FrontCommand, NodeCommand};
pub use framing::{
    copy_body, read_line, read_size, recv_body, send_body, write_line, write_size, Transfer,
    ACK, CLIENT_CHUNK_SIZE, MAX_LINE_LEN, NODE_CHUNK_SIZE,
};
pub use response::{Response, Status, MAX_PAYLOAD_SIZE};
pub use session::{relay_body, Session};

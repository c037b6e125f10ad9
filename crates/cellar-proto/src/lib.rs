//! Cellar Proto - RPC wire protocol
//!
//! The master and its workers talk over a local stream socket carrying
//! length-prefixed binary messages:
//!
//! ```text
//! +----------------+------------------+
//! | Length (4 BE)  | bincode payload  |
//! +----------------+------------------+
//! ```
//!
//! Requests carry a namespace-scoped KV operation; responses are
//! delivered strictly in the order their requests were issued on the
//! connection.

pub mod frame;
pub mod message;

pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use message::{Request, Response, ScanEntry, ScanRange, WireError};

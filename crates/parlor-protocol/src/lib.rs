//! # parlor-protocol
//!
//! Wire protocol definitions for the Parlor chat hub.
//!
//! Every frame is an event name plus a payload. Clients send
//! [`ClientFrame`]s, the hub pushes [`ServerFrame`]s.
//!
//! ## Events
//!
//! - `send_message` - Submit a broadcast or direct message
//! - `new_message` - A message delivered live
//! - `user_status` - The set of currently online users
//! - `connect` / `connected` - Authentication handshake
//! - `ping` / `pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use parlor_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::send_message(Some("bob"), "hello");
//!
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode_json(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_json, encode, encode_json, Encoding, ProtocolError};
pub use frames::{codes, ClientFrame, MessagePayload, ServerFrame, PROTOCOL_VERSION};

//! # qalink-core
//!
//! Shared protocol pieces for the qalink request/response link.
//!
//! This crate has no dependency on sockets or an async runtime.  Everything in
//! it is a pure function or a plain state machine, so it can be tested without
//! a network.
//!
//! # What problem does this solve?
//!
//! The backend speaks JSON over a raw TCP stream.  TCP has no notion of a
//! "message": one `read()` may return half a response, or two responses glued
//! together.  It also has no notion of *which* request a response belongs to.
//! This crate provides the two missing pieces:
//!
//! - **`protocol::framing`** – how message boundaries are found in the byte
//!   stream (raw chunks, length prefix, or a delimiter byte).
//! - **`protocol::correlation`** – how a response is matched to its request
//!   (strict FIFO position, or a `request_id` echoed back by the server).
//!
//! Plus the small supporting types:
//!
//! - **`protocol::ids`** – connection and request identifiers and the
//!   sequence that hands them out.
//! - **`protocol::envelope`** – the response envelope every server reply is
//!   decoded into (`status`, `message`, `data`, ...).

pub mod protocol;

pub use protocol::correlation::{probe_request_id, tag_request, CorrelationError, CorrelationMode};
pub use protocol::envelope::{ResponseEnvelope, ResponseStatus};
pub use protocol::framing::{encode_frame, FrameDecoder, Framing, FramingError, DEFAULT_MAX_FRAME_LEN};
pub use protocol::ids::{ConnectionId, IdSequence, RequestId};

//! Protocol module: identifiers, framing, correlation, and the response envelope.

pub mod correlation;
pub mod envelope;
pub mod framing;
pub mod ids;

pub use correlation::{probe_request_id, tag_request, CorrelationError, CorrelationMode};
pub use envelope::{ResponseEnvelope, ResponseStatus};
pub use framing::{encode_frame, FrameDecoder, Framing, FramingError};
pub use ids::{ConnectionId, IdSequence, RequestId};

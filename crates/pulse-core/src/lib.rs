pub mod frame;
pub mod ids;

pub use frame::{encode_frame, Frame, FrameDecoder, Payload};
pub use ids::{BrowserId, ListenerId, SessionId};

pub mod backoff;
pub mod error;
pub mod identity;
pub mod mock;
pub mod subscriber;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use error::ClientError;
pub use identity::{EphemeralIdentity, IdentitySource, PersistentIdentity};
pub use subscriber::{ConnectionState, Subscriber, SubscriberConfig};
pub use transport::{ByteStream, HttpTransport, StreamTransport};

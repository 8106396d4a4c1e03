pub mod broker;
pub mod config;
pub mod registry;
pub mod routes;
pub mod server;

pub use broker::{Broker, BrokerError, Predicate, Target};
pub use config::BrokerConfig;
pub use registry::{enforce_single_session, Connection, ConnectionRegistry, RequestContext};
pub use routes::{build_router, Session};
pub use server::{start, ServerConfig, ServerHandle};

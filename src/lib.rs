pub mod auth;
pub mod config;
pub mod executor;
pub mod packstream;
pub mod protocol;

pub use auth::{AuthBridge, AuthError, AuthResult, Authenticator, Permission};
pub use config::ServerConfig;
pub use executor::{Capabilities, EchoExecutor, ExecutorError, QueryExecutor, QueryResult};
pub use packstream::{Map, Structure, Value};
pub use protocol::{BoltServer, ShutdownHandle};

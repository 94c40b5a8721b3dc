pub mod api;
pub mod config;
pub mod connection;
pub mod replay;
pub mod session;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionError, ConnectionHandle, ConnectionState, WsConnector};
pub use replay::{LocalReplay, RemoteReplay, ReplayError, ReplayRecorder, ReplayView};
pub use session::{GameSession, SessionPhase, SessionView, TrainAction};

pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod server;
pub mod wire;

pub use et_net::WireMessage;
pub use server::Server;

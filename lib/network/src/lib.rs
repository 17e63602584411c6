pub mod client;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod session;

pub mod connection;
mod broadcast;
mod protocol;
mod room;
mod server;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::QuizServer;

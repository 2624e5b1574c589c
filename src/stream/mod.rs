pub mod multipart;
pub mod server;

pub use server::{router, StreamServer, StreamState};

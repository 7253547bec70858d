/// Per-viewer pump loop
pub mod connection;
/// Frames sent to viewers
pub mod messages;

pub use connection::*;
pub use messages::*;

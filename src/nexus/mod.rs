mod connection;
mod error;
mod transport;

pub use connection::*;
pub use error::*;
pub use transport::*;

pub mod tcp;
pub mod traits;

#[cfg(test)]
pub mod memory;

pub use tcp::TcpConnector;
pub use traits::{BoxedStream, TransportConnector};

//! Configuration type definitions

pub mod app;
pub mod connector;
pub mod device;
pub mod logging;
pub mod transport;

// Re-export commonly used types
pub use app::*;
pub use connector::*;
pub use device::*;
pub use logging::*;
pub use transport::*;

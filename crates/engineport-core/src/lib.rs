pub mod artifact;
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod network;
pub mod spec;
pub mod tensor;

pub use artifact::*;
pub use backend::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use graph::*;
pub use network::*;
pub use spec::*;
pub use tensor::*;

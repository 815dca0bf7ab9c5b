#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod executor;
pub mod image;
pub mod launcher;
pub mod layer;
pub mod logger;
pub mod namespaces;
pub mod registry;
pub mod sandbox;
pub mod syscall;
pub mod transport;
pub mod utils;

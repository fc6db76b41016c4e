pub mod components;
pub mod controller;
pub mod engine;
mod error;
pub mod iterator;
pub mod object_store;

pub use components::*;
pub use controller::{Controller, ControllerRef, MemController, RegistrationBatch, RegistrationEntry};
pub use engine::*;
pub use error::*;
pub use object_store::*;

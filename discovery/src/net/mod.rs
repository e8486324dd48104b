pub mod interfaces;

pub use interfaces::{qualifying_interfaces, Interface};

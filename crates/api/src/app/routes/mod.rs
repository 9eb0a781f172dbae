pub mod devices;
pub mod system;

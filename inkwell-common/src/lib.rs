pub mod model;
pub mod thread;

pub mod clock;
pub mod configuration;
pub mod controller;
pub mod data_stream;
pub mod device_link;
pub mod dispatch;
pub mod error_handling;
pub mod logging;
pub mod session_management;
pub mod storage;
pub mod web_interface;

pub use controller::Controller;
pub use dispatch::{CommandDispatcher, ResponseEnvelope};

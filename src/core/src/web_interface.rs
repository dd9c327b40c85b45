// Web Interface module root
pub mod connection;
pub mod routes;
pub mod web_server;


// Re-export commonly used items
pub use routes::routes;
pub use web_server::WebServer;

pub mod http;

pub use http::{router, spawn_http_server, HttpServerState};

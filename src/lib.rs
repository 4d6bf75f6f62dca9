pub mod cache;
pub mod config;
pub mod context;
pub mod exception;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod routes;
pub mod server;
pub mod session;
pub mod static_files;
pub mod templates;
pub mod util;
pub mod validator;

pub use cache::FileCache;
pub use config::{Args, Config, ConfigError};
pub use context::Context;
pub use exception::Exception;
pub use handlers::{Action, Application, Endpoint};
pub use middleware::{Chain, Handler, Middleware};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
pub use router::Router;
pub use server::ConnectionSettings;

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod service;

pub use backend::{BackendGateway, HttpBackendGateway, ImageForm, QuestionForm};
pub use config::ProxyConfig;
pub use error::BackendError;
pub use service::{AppState, build_router, create_app};

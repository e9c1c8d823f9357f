pub mod archive;
pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod indicator;
pub mod model;
pub mod notifier;
pub mod pipeline;
pub mod store;
pub mod strategy;
pub mod validator;

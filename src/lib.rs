pub mod auth;
pub mod clock;
pub mod engine;
pub mod ident;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod store;
pub mod tls;
pub mod venue;
pub mod wire;

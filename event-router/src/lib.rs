pub mod api;
pub mod cbor;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error_chain;
pub mod header;
pub mod instruction;
pub mod pipeline;
pub mod processor;
pub mod prometheus;
pub mod remap;
pub mod router;
pub mod server;
pub mod sinks;
pub mod topics;
pub mod validation;

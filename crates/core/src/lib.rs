pub mod channel;
pub mod config;
pub mod messages;
pub mod pagination;
pub mod panel;
pub mod registry;
pub mod result_set;
pub mod state;


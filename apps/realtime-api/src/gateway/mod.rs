pub mod admin;
pub mod calls;
pub mod events;
pub mod notify;
pub mod registry;
pub mod server;

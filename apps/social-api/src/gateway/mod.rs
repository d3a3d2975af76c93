pub mod connection;
pub mod events;
pub mod presence;
pub mod pump;
pub mod registry;
pub mod router;
pub mod server;
pub mod shortcodes;

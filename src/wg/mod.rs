pub mod cookie;
pub mod crypto;
pub mod keys;
pub mod messages;
pub mod peer;
pub mod session;
pub mod timers;

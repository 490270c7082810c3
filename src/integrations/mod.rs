//! External integrations module.
//!
//! Build-outcome notification delivery. Delivery failures are logged and
//! never affect build results.

#[cfg(feature = "notifications")]
pub mod discord;

#[cfg(feature = "notifications")]
pub use discord::DiscordNotifier;

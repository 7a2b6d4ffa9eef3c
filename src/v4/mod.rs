pub mod classify;
pub mod extensions;
pub mod handlers;
pub mod response;
pub mod transport;
pub mod worker;

/// Port relays listen on
pub const SERVER_PORT: u16 = 67;

pub use worker::v4_worker;

#[cfg(test)]
mod tests;

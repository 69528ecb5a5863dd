//! Domain model: records, value objects and the ports the engine depends on.

pub mod context;
pub mod events;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod ports;
pub mod session;
pub mod teacher;
pub mod withdrawal;

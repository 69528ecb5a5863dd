//! Application layer: the services that orchestrate the domain over the ports.
//!
//! `Engine` wires the Session Manager, Payment Gateway Adapter, Settlement
//! Reconciler, Wallet Ledger and Withdrawal Processor over one set of stores.

pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod sessions;
pub mod settlement;
pub mod withdrawals;

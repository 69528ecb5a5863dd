pub mod wallet_writer;

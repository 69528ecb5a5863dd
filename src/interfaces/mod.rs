//! Batch I/O around the engine: a JSON-lines command script in, a CSV wallet
//! report out, and the driver that replays one against the other.

pub mod csv;
pub mod jsonl;
pub mod replay;

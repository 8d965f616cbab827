//! Core engine — scan the seed's keyspace, select a transfer, drive it to finality.

pub mod clock;
pub mod scanner;
pub mod transfer;
pub mod finality;

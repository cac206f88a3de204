mod common;

#[path = "resolver/cascade_offline.rs"]
mod cascade_offline;

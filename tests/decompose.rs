mod common;

#[path = "decompose/scenarios.rs"]
mod scenarios;

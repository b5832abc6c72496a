#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod checkpoint;
pub mod config;
pub mod decide;
pub mod evaluate;
pub mod generate;
pub mod pipeline;
pub mod seed;
pub mod types;

#[path = "../data/mod.rs"]
pub mod data;

#[path = "../classify/mod.rs"]
pub mod classify;

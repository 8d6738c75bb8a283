pub mod adapters;
pub mod config;
pub mod error;
pub mod jobs;
pub mod sync;
pub mod web;

#[cfg(test)]
mod testing;

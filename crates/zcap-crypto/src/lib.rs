#![forbid(unsafe_code)]

pub mod hash;
pub mod canonical;
pub mod utils;

pub mod content_key;
pub mod wallet;
pub mod device;

#[cfg(test)]
mod proptests;

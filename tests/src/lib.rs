//! Cross-crate scenarios run against fixture applications.

pub mod fixture;

#[cfg(test)]
mod core;
#[cfg(test)]
mod pipeline;
#[cfg(test)]
mod transforms;

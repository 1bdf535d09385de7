//! Subcommands of the `dexcloak` binary.

pub mod commands;

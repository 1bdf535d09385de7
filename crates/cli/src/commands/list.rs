//! Module for the `list` subcommand, which prints every registered pass.

use clap::Args;
use dexcloak_transform::{registry, Capability, Transform};
use std::error::Error;

/// Arguments for the `list` subcommand.
#[derive(Args)]
pub struct ListArgs {
    /// Only show passes of this category (e.g. `encryption`)
    #[arg(long)]
    category: Option<String>,
}

fn describe(pass: &dyn Transform) -> String {
    let adds: Vec<&str> = pass
        .capabilities()
        .iter()
        .map(|c| match c {
            Capability::AddsFields => "adds fields",
            Capability::AddsMethods => "adds methods",
        })
        .collect();
    let line = format!("{:<24}{}", pass.name(), pass.category());
    if adds.is_empty() {
        line
    } else {
        format!("{line:<38}{}", adds.join(", "))
    }
}

impl ListArgs {
    fn lines(&self) -> Vec<String> {
        registry::all()
            .iter()
            .filter(|pass| {
                self.category
                    .as_deref()
                    .map_or(true, |c| pass.category().to_string().eq_ignore_ascii_case(c))
            })
            .map(|pass| describe(&**pass))
            .collect()
    }
}

impl super::Command for ListArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        for line in self.lines() {
            println!("{line}");
        }
        Ok(())
    }
}

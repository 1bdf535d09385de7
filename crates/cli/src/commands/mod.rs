use clap::Subcommand;
use std::error::Error;

pub mod list;
pub mod obfuscate;

#[derive(Subcommand)]
pub enum Cmd {
    /// Obfuscate an APK or app bundle with the given passes
    Obfuscate(obfuscate::ObfuscateArgs),

    /// List the available passes
    List(list::ListArgs),
}

pub trait Command {
    fn execute(self) -> Result<(), Box<dyn Error>>;
}

impl Command for Cmd {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Self::Obfuscate(args) => args.execute(),
            Self::List(args) => args.execute(),
        }
    }
}

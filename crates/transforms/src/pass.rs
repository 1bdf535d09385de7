use crate::{Capability, Transform};
use dexcloak_core::Session;
use dexcloak_utils::errors::ObfuscateError;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{error, info};

/// Trait for running a sequence of obfuscation passes over a session.
pub trait Pass {
    fn run(
        &self,
        session: &mut Session,
        passes: &[Box<dyn Transform>],
        seed: u64,
    ) -> Result<(), ObfuscateError>;
}

/// Default implementation of the Pass trait.
///
/// Passes run strictly in order against the same session and share one seeded RNG. Every pass
/// is recorded in [`Session::applied_passes`] before its outcome is known, so a failure report
/// always names the pass that broke.
pub struct DefaultPass;

impl Pass for DefaultPass {
    fn run(
        &self,
        session: &mut Session,
        passes: &[Box<dyn Transform>],
        seed: u64,
    ) -> Result<(), ObfuscateError> {
        session.passes_adding_fields = count_capability(passes, Capability::AddsFields);
        session.passes_adding_methods = count_capability(passes, Capability::AddsMethods);
        session.ensure_decoded()?;

        let mut rng = StdRng::seed_from_u64(seed);

        for pass in passes {
            let name = pass.name();
            let result = pass.apply(session, &mut rng);
            session.applied_passes.push(name.to_string());

            match result {
                Ok(changed) => {
                    info!("{:>22} {}", name, if changed { "✓" } else { "·" });
                }
                Err(source) => {
                    error!(pass = name, "pass failed: {}", source);
                    return Err(ObfuscateError::Pass {
                        name: name.to_string(),
                        applied: session.applied_passes.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

fn count_capability(passes: &[Box<dyn Transform>], capability: Capability) -> usize {
    passes
        .iter()
        .filter(|p| p.capabilities().contains(&capability))
        .count()
}

/// Convenience function to run the default pass.
pub fn run(session: &mut Session, passes: &[Box<dyn Transform>], seed: u64) -> Result<(), ObfuscateError> {
    DefaultPass.run(session, passes, seed)
}

//! Passes that hand the decoded tree back to the external toolchain.

use crate::{Category, Transform};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use tracing::info;

/// Builds the decoded tree into the output archive.
pub struct Rebuild;

impl Transform for Rebuild {
    fn name(&self) -> &'static str {
        "Rebuild"
    }

    fn category(&self) -> Category {
        Category::Trivial
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let archive = session.build_output()?;
        info!("rebuilt {}", archive.display());
        Ok(true)
    }
}

/// Signs the output archive with the configured keystore.
pub struct NewSignature;

impl Transform for NewSignature {
    fn name(&self) -> &'static str {
        "NewSignature"
    }

    fn category(&self) -> Category {
        Category::Trivial
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let credentials = session.signing.as_ref().ok_or(TransformError::MissingCredentials)?;
        session.toolchain().sign(&session.output, credentials)?;
        Ok(true)
    }
}

/// Zip-aligns the output archive.
pub struct NewAlignment;

impl Transform for NewAlignment {
    fn name(&self) -> &'static str {
        "NewAlignment"
    }

    fn category(&self) -> Category {
        Category::Trivial
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        session.toolchain().align(&session.output)?;
        Ok(true)
    }
}

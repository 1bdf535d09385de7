use crate::{Category, Transform};
use dexcloak_core::xml::XmlDocument;
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use tracing::debug;

/// Drops duplicate manifest elements and shuffles the order of every element's children.
///
/// Element order carries no meaning in the manifest, so the result is equivalent but differs
/// textually from the original.
pub struct RandomManifest;

impl Transform for RandomManifest {
    fn name(&self) -> &'static str {
        "RandomManifest"
    }

    fn category(&self) -> Category {
        Category::Resources
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let path = session.manifest_file()?.to_path_buf();
        let mut document = XmlDocument::parse(&files::read_text(&path)?)?;

        let before = document.root.element_count();
        document.root.remove_duplicates();
        document.root.scramble(rng);
        debug!(
            "  manifest has {} element(s), {} duplicate(s) removed",
            document.root.element_count(),
            before - document.root.element_count()
        );

        files::write_atomic(&path, document.to_xml_string(4)?.as_bytes())?;
        Ok(true)
    }
}

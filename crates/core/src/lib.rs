//! Building blocks shared by the dexcloak passes: the smali line grammar, the decoded
//! application inventory, the member budget and the [`session::Session`] every pass mutates.

pub mod budget;
pub mod crypto;
pub mod inventory;
pub mod resources;
pub mod session;
pub mod smali;
pub mod toolchain;
pub mod xml;

pub use session::{Session, SessionConfig};
pub use toolchain::{ExternalToolchain, SigningCredentials, Toolchain};

pub mod batch;
pub mod template;

pub use batch::{BatchRegistrar, SessionKeyGrant};
pub use template::{Template, TemplateCatalog};

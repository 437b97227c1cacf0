pub mod netattachdef;

pub use netattachdef::{NetAttachDefError, NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};

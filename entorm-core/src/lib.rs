//! Order-preserving key encoding, the entity value codec, the dynamic value tree, and the
//! domain error taxonomy — the leaf crate everything else in this workspace builds on.

pub mod codec;
pub mod error;
pub mod keybuilder;
pub mod value;

pub use codec::{FieldSchema, FieldShape};
pub use error::{Error, Result};
pub use keybuilder::IndexKeyBuilder;
pub use value::{ScalarKind, Value};

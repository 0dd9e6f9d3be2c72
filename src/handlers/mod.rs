pub mod diagnostics;
pub mod doc_snapshot;
pub mod health;

pub use diagnostics::*;
pub use doc_snapshot::*;
pub use health::*;

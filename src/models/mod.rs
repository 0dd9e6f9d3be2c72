pub mod diagnostics;
pub mod doc;
pub mod error;
pub mod health;
pub mod messages;
pub mod ready;

pub use diagnostics::*;
pub use doc::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use ready::*;

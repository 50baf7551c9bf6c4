pub mod run;
pub mod source;

pub use run::*;
pub use source::*;

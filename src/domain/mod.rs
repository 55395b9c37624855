pub mod claim;
pub mod prediction;
pub mod run;

pub use claim::*;
pub use prediction::*;
pub use run::*;

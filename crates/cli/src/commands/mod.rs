pub mod decompile;
pub mod identity;

pub use decompile::*;
pub use identity::*;

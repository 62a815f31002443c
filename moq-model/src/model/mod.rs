mod broadcast;
mod group;
mod origin;
mod track;

pub use broadcast::*;
pub use group::*;
pub use origin::*;
pub use track::*;

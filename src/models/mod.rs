pub mod image;
pub mod policy;
pub mod update;

pub use image::*;
pub use policy::*;
pub use update::*;

pub mod catalog;
pub mod common;
pub mod content;
pub mod image;
pub mod task;

pub use catalog::*;
pub use common::*;
pub use content::*;
pub use image::*;
pub use task::*;

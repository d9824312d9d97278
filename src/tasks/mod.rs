//! Build tasks: clean plus the six transforms.
//!
//! Every task reads its sources relative to the configured source directory
//! and writes under the build directory. Transforms take the cancellation
//! token of the scope they run in and check it between files.

pub mod clean;
pub mod copy;
pub mod html;
pub mod images;
pub mod sources;
pub mod sprite;
pub mod styles;
pub mod webp;

pub use clean::clean;
pub use copy::copy;
pub use html::html;
pub use images::images;
pub use sources::{SourceFile, SourceSet};
pub use sprite::sprite;
pub use styles::styles;
pub use webp::webp;

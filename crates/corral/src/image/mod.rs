//! Image settings consumed by the runtime.

mod reference;

pub use reference::ImageReference;

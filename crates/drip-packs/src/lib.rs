//! `drip-packs`: content sequences and how they are rendered.
//!
//! A pack is an ordered list of steps addressed by stable slug. Packs are
//! loaded once at startup into an immutable [`registry::PackRegistry`],
//! which is injected into the scheduler as its step resolver. Rendering is
//! a per-pack strategy selected from a [`render::RendererSet`].

pub mod registry;
pub mod render;

pub use registry::{Pack, PackRegistry, Step};
pub use render::{PlainRenderer, RenderedEmail, Renderer, RendererSet};

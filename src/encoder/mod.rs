//! The registered compression-codec interface consumed by [`crate::writer`]
//! and [`crate::codec`]. Concrete codec engineering beyond what's needed to
//! round-trip this engine's own output is out of scope - the codecs below
//! are the ones the writer already knows how to dispatch to.

pub mod compression;

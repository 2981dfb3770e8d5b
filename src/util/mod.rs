//! Shared low-level data utilities used by the stream and parser layers.

mod bitbuffer;
mod endian;
mod safe_multiply;
mod suffix;

pub use bitbuffer::{BitBuffer, BitWriter};
pub use endian::ByteOrder;
pub use safe_multiply::safe_multiply_u32;
pub use suffix::check_suffix;

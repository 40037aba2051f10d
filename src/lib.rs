#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod map;

pub use alloc::Allocator;
pub use alloc::Global;
pub use alloc::OutOfMemory;
pub use map::HashTrieMap;
pub use map::SipRandomState;

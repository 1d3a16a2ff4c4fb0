//! Frame sources

pub mod region;

pub use region::RegionSource;

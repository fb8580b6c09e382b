pub mod coordinates;
pub mod earth_engine;
pub mod export;
pub mod extractor;
pub mod kml;
pub mod retry;
pub mod session;
pub mod windows;

/// Console and file log sink built on `fern`.
pub mod logger;

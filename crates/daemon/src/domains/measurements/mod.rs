mod extract_measurements;

pub use extract_measurements::*;

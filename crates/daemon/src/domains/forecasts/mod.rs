mod extract_forecasts;

pub use extract_forecasts::*;

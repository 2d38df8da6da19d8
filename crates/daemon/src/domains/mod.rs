mod forecasts;
mod measurements;
mod retrieval;

pub use forecasts::*;
pub use measurements::*;
pub use retrieval::*;

mod catalog;
mod clock;
mod domains;
mod grid;
mod grid_cache;
mod health;
mod models;
mod netcdf;
mod radiation;
mod resolver;
mod settings;
mod time_window;
mod utils;

pub use catalog::*;
pub use clock::*;
pub use domains::*;
pub use grid::*;
pub use grid_cache::*;
pub use health::*;
pub use models::*;
pub use self::netcdf::*;
pub use radiation::*;
pub use resolver::*;
pub use settings::*;
pub use time_window::*;
pub use utils::*;

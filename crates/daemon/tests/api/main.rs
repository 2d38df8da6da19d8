mod forecasts;
mod helpers;
mod measurements;
mod snapshot;

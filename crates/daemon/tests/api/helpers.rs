use async_trait::async_trait;
use bytes::Bytes;
use radiation_daemon::{
    ExtractionSettings, FetchError, FixedClock, GlobalRadiation, NearestPointResolver,
    RemoteSource,
};
use radiation_test_utils::GridSpec;
use slog::{o, Logger};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::{macros::datetime, OffsetDateTime};

pub const NOW: OffsetDateTime = datetime!(2024-05-14 20:43:12 UTC);

/// 4x4 grid with a cell at (52.5, 13.4).
pub fn berlin_grid() -> GridSpec {
    GridSpec::new(52.4, 13.3, 0.05, 4, 4)
}

/// Serves files from memory; anything not published fails like a dropped
/// connection.
#[derive(Default)]
pub struct InMemorySource {
    files: Mutex<HashMap<String, Bytes>>,
    requests: Mutex<Vec<String>>,
}

impl InMemorySource {
    pub fn publish(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(name.into(), Bytes::from(bytes));
    }

    pub fn requests_for(&self, name: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == name)
            .count()
    }
}

#[async_trait]
impl RemoteSource for InMemorySource {
    async fn fetch(&self, file: &str) -> Result<Bytes, FetchError> {
        self.requests.lock().unwrap().push(file.to_string());
        self.files
            .lock()
            .unwrap()
            .get(file)
            .cloned()
            .ok_or_else(|| FetchError::Request {
                url: format!("https://opendata.example/{}", file),
                reason: "connection reset by peer".to_string(),
            })
    }

    async fn directory_index(&self) -> Result<String, FetchError> {
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .map(|name| format!("<a href=\"{0}\">{0}</a>\n", name))
            .collect())
    }
}

pub struct TestApp {
    pub radiation: GlobalRadiation,
    pub source: Arc<InMemorySource>,
    pub clock: Arc<FixedClock>,
    pub resolver: Arc<NearestPointResolver>,
}

pub fn spawn_app(settings: ExtractionSettings) -> TestApp {
    let source = Arc::new(InMemorySource::default());
    let clock = Arc::new(FixedClock::new(NOW));
    let resolver = Arc::new(NearestPointResolver::default());
    let radiation = GlobalRadiation::new(
        Logger::root(slog::Discard, o!()),
        source.clone(),
        Arc::clone(&resolver),
        settings,
    )
    .with_clock(clock.clone());

    TestApp {
        radiation,
        source,
        clock,
        resolver,
    }
}

//! Health score recomputation. No network: the score is a function of
//! fields already stored on the document, including whatever the
//! repository source merged earlier.

use async_trait::async_trait;
use pkgindex_core::enrich::EnrichmentSource;
use pkgindex_core::health::{enhanced_score, HealthReport};
use pkgindex_core::models::{str_field, Document};

pub struct HealthSource {
    now: i64,
}

impl HealthSource {
    /// `now` is fixed for the whole run so every document is scored
    /// against the same clock.
    pub fn new(now: i64) -> Self {
        Self { now }
    }
}

#[async_trait]
impl EnrichmentSource for HealthSource {
    type Data = HealthReport;

    fn name(&self) -> &str {
        "health"
    }

    fn identifier(&self, doc: &Document) -> Option<String> {
        Some(str_field(doc, "id").to_string()).filter(|id| !id.is_empty())
    }

    async fn fetch(&self, _identifier: &str, doc: &Document) -> Option<HealthReport> {
        Some(enhanced_score(doc, self.now))
    }

    fn update_fields(&self, data: &HealthReport, _doc: &Document) -> Document {
        data.to_fields()
    }
}

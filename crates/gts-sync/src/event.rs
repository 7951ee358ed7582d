//! Cloud Storage notifications delivered as CloudEvents over HTTP.

use serde::{Deserialize, Serialize};

pub const METHOD_HEADER: &str = "ce-methodname";
pub const SUBJECT_HEADER: &str = "ce-subject";

/// Method name carried by object finalize (upload) notifications.
pub const CREATE_METHOD: &str = "storage.objects.create";

const RESOURCE_PREFIX: &str = "storage.googleapis.com/projects/_/buckets/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub method: String,
    pub subject: String,
}

impl StorageEvent {
    pub fn new(method: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            subject: subject.into(),
        }
    }

    pub fn is_create(&self) -> bool {
        self.method == CREATE_METHOD
    }

    /// Object path inside `bucket`. The subject arrives either bare
    /// (`objects/daily_hours-1.csv`) or as a full resource name
    /// (`storage.googleapis.com/projects/_/buckets/<bucket>/objects/daily_hours-1.csv`).
    pub fn object_path(&self, bucket: &str) -> Option<String> {
        let mut rest = self.subject.trim();
        rest = rest.strip_prefix(RESOURCE_PREFIX).unwrap_or(rest);
        if !bucket.is_empty() {
            rest = rest.strip_prefix(bucket).unwrap_or(rest);
        }
        rest = rest
            .strip_prefix("/objects/")
            .or_else(|| rest.strip_prefix("objects/"))
            .unwrap_or(rest);
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

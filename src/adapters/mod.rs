// Concrete `Storage` backends.

pub mod local;
pub mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

/// Content type for an object key, chosen by extension.
pub fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "ndjson" => "application/fhir+ndjson",
        Some(ext) if ext == "csv" => "text/csv",
        Some(ext) if ext == "json" => "application/json",
        Some(ext) if ext == "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("bcda/patients/p_1.ndjson"), "application/fhir+ndjson");
        assert_eq!(content_type_for("exports/t.CSV"), "text/csv");
        assert_eq!(content_type_for("metadata.json"), "application/json");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }
}

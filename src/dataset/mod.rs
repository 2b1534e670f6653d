//! Dataset loading
//!
//! A dataset is a CSV file (local path or http(s) URL) with a text
//! column and optional `id` and `metadata` columns. With no source
//! configured the four built-in Microsoft Fabric samples are used.

use csv::ReaderBuilder;
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{RagError, Result, Stage};
use crate::http::{build_client, check_status};
use crate::retry::RetryManager;
use crate::types::{Document, Metadata, MetadataValue};

/// Public sample dataset the demo was built around
pub const DEMO_DATASET_URL: &str =
    "https://raw.githubusercontent.com/instrovate/real-pinecone-demo/main/Sample_Microsoft_Fabric_Dataset.csv";

/// Where documents come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// Built-in sample documents
    Samples,
    Path(PathBuf),
    Url(String),
}

impl DatasetSource {
    /// `None`/"samples" → built-ins, "demo" → the public CSV,
    /// http(s) → URL, anything else → file path
    pub fn parse(source: Option<&str>) -> Self {
        match source.map(str::trim) {
            None | Some("") | Some("samples") => DatasetSource::Samples,
            Some("demo") => DatasetSource::Url(DEMO_DATASET_URL.to_string()),
            Some(s) if s.starts_with("http://") || s.starts_with("https://") => {
                DatasetSource::Url(s.to_string())
            }
            Some(s) => DatasetSource::Path(PathBuf::from(s)),
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::Samples => f.write_str("built-in samples"),
            DatasetSource::Path(p) => write!(f, "{}", p.display()),
            DatasetSource::Url(u) => f.write_str(u),
        }
    }
}

/// Fetches and parses a dataset once per call
pub struct DatasetLoader {
    source: DatasetSource,
    timeout: Duration,
}

impl DatasetLoader {
    pub fn new(source: DatasetSource, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub fn source(&self) -> &DatasetSource {
        &self.source
    }

    pub async fn load(&self) -> Result<Vec<Document>> {
        let documents = match &self.source {
            DatasetSource::Samples => sample_documents(),
            DatasetSource::Path(path) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    RagError::DatasetError(format!("Failed to open {}: {}", path.display(), e))
                })?;
                parse_csv(file)?
            }
            DatasetSource::Url(url) => {
                let body = RetryManager::single_attempt(self.timeout)
                    .execute_once(Stage::Dataset, || self.fetch(url))
                    .await?;
                parse_csv(body.as_slice())?
            }
        };

        info!(source = %self.source, documents = documents.len(), "loaded dataset");
        Ok(documents)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "downloading dataset");
        let client = build_client(self.timeout)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Dataset, e, self.timeout))?;
        let body = check_status(Stage::Dataset, response)
            .await?
            .bytes()
            .await
            .map_err(|e| RagError::transport(Stage::Dataset, e, self.timeout))?;
        Ok(body.to_vec())
    }
}

/// Parse CSV rows into documents
///
/// Rows with blank text are skipped. Rows without an id get `id-{n}`,
/// where n counts the rows kept so far. Repeated ids are an error.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<Document>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| RagError::DatasetError(format!("Failed to read CSV header: {}", e)))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let text_idx = column("text")
        .ok_or_else(|| RagError::DatasetError("CSV has no text column".to_string()))?;
    let id_idx = column("id");
    let metadata_idx = column("metadata");

    let mut documents = Vec::new();
    let mut seen = HashSet::new();

    for (row, record) in rdr.records().enumerate() {
        let record = record
            .map_err(|e| RagError::DatasetError(format!("Bad CSV row {}: {}", row + 1, e)))?;

        let text = record.get(text_idx).unwrap_or_default().trim();
        if text.is_empty() {
            debug!(row = row + 1, "skipping row with empty text");
            continue;
        }

        let id = id_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("id-{}", documents.len()));

        if !seen.insert(id.clone()) {
            return Err(RagError::DatasetError(format!("duplicate document id '{}'", id)));
        }

        let mut document = Document::new(id, text)?;
        if let Some(raw) = metadata_idx.and_then(|i| record.get(i)) {
            document.metadata = parse_metadata(raw, row + 1)?;
        }
        documents.push(document);
    }

    Ok(documents)
}

fn parse_metadata(raw: &str, row: usize) -> Result<Metadata> {
    if raw.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        RagError::DatasetError(format!("row {}: metadata is not JSON: {}", row, e))
    })?;
    let object = value.as_object().ok_or_else(|| {
        RagError::DatasetError(format!("row {}: metadata must be a JSON object", row))
    })?;

    object
        .iter()
        .map(|(k, v)| {
            MetadataValue::from_json(v)
                .map(|value| (k.clone(), value))
                .ok_or_else(|| {
                    RagError::DatasetError(format!(
                        "row {}: metadata '{}' must be a string, number or bool",
                        row, k
                    ))
                })
        })
        .collect()
}

/// The four built-in documents
pub fn sample_documents() -> Vec<Document> {
    const SAMPLES: [(&str, &str, &str); 4] = [
        (
            "fabric_intro",
            "Microsoft Fabric is an end-to-end analytics platform that brings data engineering, \
             data science, real-time analytics and business intelligence together in a single \
             SaaS experience.",
            "overview",
        ),
        (
            "power_bi",
            "Power BI is a business analytics service that delivers interactive visualizations, \
             reports and dashboards so users can explore data and share insights.",
            "reporting",
        ),
        (
            "data_factory",
            "Data Factory in Microsoft Fabric provides data integration and orchestration \
             pipelines that copy, transform and schedule data movement from hundreds of sources.",
            "integration",
        ),
        (
            "onelake",
            "OneLake is the unified data lake for Microsoft Fabric. Every workspace keeps its \
             data in OneLake once, in open Delta Parquet format, so all workloads can use it \
             without copies.",
            "storage",
        ),
    ];

    SAMPLES
        .iter()
        .map(|(id, text, category)| Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::from([("category".to_string(), MetadataValue::from(*category))]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_source_parsing() {
        assert_eq!(DatasetSource::parse(None), DatasetSource::Samples);
        assert_eq!(DatasetSource::parse(Some("samples")), DatasetSource::Samples);
        assert_eq!(
            DatasetSource::parse(Some("demo")),
            DatasetSource::Url(DEMO_DATASET_URL.to_string())
        );
        assert_eq!(
            DatasetSource::parse(Some("https://example.com/d.csv")),
            DatasetSource::Url("https://example.com/d.csv".to_string())
        );
        assert_eq!(
            DatasetSource::parse(Some("data/docs.csv")),
            DatasetSource::Path(PathBuf::from("data/docs.csv"))
        );
    }

    #[test]
    fn test_samples() {
        let docs = sample_documents();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["fabric_intro", "power_bi", "data_factory", "onelake"]);
        assert!(docs.iter().all(|d| !d.text.trim().is_empty()));
    }

    #[test]
    fn test_capitalised_text_column_and_generated_ids() {
        let csv = "Title,Text\nA,First text\nB,\nC,Third text\n";
        let docs = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "id-0");
        assert_eq!(docs[1].id, "id-1");
        assert_eq!(docs[1].text, "Third text");
    }

    #[test]
    fn test_id_and_metadata_columns() {
        let csv = "id,text,metadata\n\
                   onelake,OneLake stores data,\"{\"\"category\"\": \"\"storage\"\", \"\"rank\"\": 1}\"\n";
        let docs = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(docs[0].id, "onelake");
        assert_eq!(docs[0].metadata["category"], MetadataValue::from("storage"));
        assert_eq!(docs[0].metadata["rank"], MetadataValue::Integer(1));
    }

    #[test]
    fn test_nested_metadata_rejected() {
        let csv = "id,text,metadata\na,text,\"{\"\"tags\"\": [1]}\"\n";
        assert!(matches!(parse_csv(csv.as_bytes()), Err(RagError::DatasetError(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let csv = "id,text\na,one\na,two\n";
        let err = parse_csv(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_missing_text_column() {
        let csv = "id,body\na,one\n";
        assert!(parse_csv(csv.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,text").unwrap();
        writeln!(file, "x,Some text").unwrap();

        let loader = DatasetLoader::new(
            DatasetSource::Path(file.path().to_path_buf()),
            Duration::from_secs(5),
        );
        let docs = loader.load().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "x");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let loader = DatasetLoader::new(
            DatasetSource::Path(PathBuf::from("/nonexistent/ragline.csv")),
            Duration::from_secs(5),
        );
        let err = loader.load().await.unwrap_err();
        assert_eq!(err.stage(), Stage::Dataset);
    }

    #[tokio::test]
    async fn test_stalled_download_times_out() {
        let addr = crate::http::tests::silent_listener().await;
        let loader = DatasetLoader::new(
            DatasetSource::Url(format!("http://{}/docs.csv", addr)),
            Duration::from_millis(300),
        );

        match loader.load().await.unwrap_err() {
            RagError::Timeout { stage, duration_ms } => {
                assert_eq!(stage, Stage::Dataset);
                assert_eq!(duration_ms, 300);
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_load_demo_dataset() {
        let loader = DatasetLoader::new(DatasetSource::parse(Some("demo")), Duration::from_secs(30));
        assert!(!loader.load().await.unwrap().is_empty());
    }
}

//! JSON export of a full analysis run

use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;

use crate::data::Dataset;
use crate::forecast::ForecastOutcome;
use crate::segmentation::{summarize, CategorySummary, SegmentationResult, Thresholds};

/// Everything a run produced, in a serializable shape
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub distinct_items: usize,
    pub thresholds: Thresholds,
    pub summary: Vec<CategorySummary>,
    pub segmentation: &'a [SegmentationResult],
    pub forecast: Option<&'a ForecastOutcome>,
}

impl<'a> AnalysisReport<'a> {
    pub fn new(
        dataset: &Dataset,
        thresholds: Thresholds,
        segmentation: &'a [SegmentationResult],
        forecast: Option<&'a ForecastOutcome>,
    ) -> Self {
        Self {
            rows_read: dataset.rows_read,
            rows_dropped: dataset.rows_dropped,
            distinct_items: segmentation.len(),
            thresholds,
            summary: summarize(segmentation),
            segmentation,
            forecast,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, output_path: &str) -> crate::Result<()> {
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create report file {}", output_path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Transaction;
    use crate::segmentation::segment_transactions;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_dataset() -> Dataset {
        let timestamp = NaiveDate::from_ymd_opt(2011, 5, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Dataset::from_transactions(vec![
            Transaction::new("22423", timestamp, 2.0, 12.75),
            Transaction::new("85099B", timestamp, 10.0, 1.65),
            Transaction::new("47566", timestamp, 4.0, 4.95),
        ])
    }

    #[test]
    fn test_report_json_shape() {
        let dataset = sample_dataset();
        let results = segment_transactions(&dataset.transactions, Thresholds::default()).unwrap();
        let report = AnalysisReport::new(&dataset, Thresholds::default(), &results, None);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["rows_read"], 3);
        assert_eq!(json["distinct_items"], 3);
        assert_eq!(json["segmentation"][0]["item_id"], "22423");
        assert_eq!(json["summary"].as_array().unwrap().len(), 3);
        assert!(json["forecast"].is_null());
    }

    #[test]
    fn test_write_json() {
        let dataset = sample_dataset();
        let results = segment_transactions(&dataset.transactions, Thresholds::default()).unwrap();
        let report = AnalysisReport::new(&dataset, Thresholds::default(), &results, None);

        let dir = tempdir().unwrap();
        let output_path = dir.path().join("report.json");
        report.write_json(output_path.to_str().unwrap()).unwrap();

        assert!(output_path.exists());
        let contents = std::fs::read_to_string(&output_path).unwrap();
        assert!(contents.contains("\"category\""));
    }
}

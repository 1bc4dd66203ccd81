use crate::data::{FeatureSource, RawCollection};
use crate::error::Error;
use crate::output::OutputDir;
use crate::prefectures;
use crate::processing::{partition_by_parent, Aggregator, MunicipalityKeys, OazaKeys};
use crate::quantize::Quantizer;
use crate::types::Meta;
use std::thread;
use std::time::Duration;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        retries: 0,
        delay: Duration::ZERO,
    };
}

pub fn fetch_with_retry<S>(source: &S, region: u8, retry: RetryPolicy) -> Result<RawCollection, Error>
where
    S: FeatureSource + ?Sized,
{
    let mut attempt = 0;
    loop {
        match source.fetch(region, attempt) {
            Ok(collection) => return Ok(collection),
            Err(e) if attempt < retry.retries => {
                warn!(region, attempt, error = %e, delay = ?retry.delay, "Retrying after error");
                thread::sleep(retry.delay);
                attempt += 1;
            }
            Err(source) => return Err(Error::Retrieval { region, source }),
        }
    }
}

/// What a batch run needs besides its source and key extractor.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Processed in this order, one after the other.
    pub regions: Vec<u8>,
    pub quantizer: Quantizer,
    pub retry: RetryPolicy,
    pub output: OutputDir,
}

#[derive(Debug)]
pub struct RegionFailure {
    pub region: u8,
    pub error: Error,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RegionOutput {
    units: usize,
    files: usize,
    bytes: u64,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub regions_ok: usize,
    pub failures: Vec<RegionFailure>,
    /// Output features written, municipalities or oaza depending on the pipeline.
    pub units: usize,
    pub files: usize,
    pub bytes: u64,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_regions(&self) -> Vec<u8> {
        self.failures.iter().map(|failure| failure.region).collect()
    }

    fn record(&mut self, region: u8, result: Result<RegionOutput, Error>) {
        match result {
            Ok(output) => {
                self.regions_ok += 1;
                self.units += output.units;
                self.files += output.files;
                self.bytes += output.bytes;
            }
            Err(e) => {
                warn!(region, error = %e, "Region failed, moving on");
                self.failures.push(RegionFailure { region, error: e });
            }
        }
    }

    pub fn log(&self, pipeline: &str) {
        info!(
            pipeline,
            regions_ok = self.regions_ok,
            regions_failed = self.failures.len(),
            failed = ?self.failed_regions(),
            units = self.units,
            files = self.files,
            kb = self.bytes / 1024,
            "Batch complete"
        );
        for failure in &self.failures {
            error!(pipeline, region = failure.region, error = %failure.error, "Region failed");
        }
    }
}

/// Process exit status for a run made of one or more batches: 1 as soon as any region failed.
pub fn exit_status(summaries: &[BatchSummary]) -> u8 {
    if summaries.iter().all(BatchSummary::is_success) {
        0
    } else {
        1
    }
}

/// One file per region, `{region:02}.json`, holding every municipality of the prefecture.
pub fn run_municipalities<S>(source: &S, keys: &MunicipalityKeys, settings: &BatchSettings) -> BatchSummary
where
    S: FeatureSource + ?Sized,
{
    let aggregator = Aggregator::new(settings.quantizer).keep_empty_groups(true);
    let mut summary = BatchSummary::default();

    for &region in &settings.regions {
        let _span = info_span!("region", region, prefecture = prefectures::name(region)).entered();

        let result = fetch_with_retry(source, region, settings.retry).and_then(|raw| {
            let collection = aggregator.aggregate(raw.features, keys);
            let bytes = settings
                .output
                .write(&format!("{region:02}.json"), &collection)?;
            let polygons: usize = collection
                .features
                .iter()
                .map(|feature| feature.geometry.polygon_count())
                .sum();
            info!(
                municipalities = collection.len(),
                polygons,
                kb = bytes / 1024,
                "Region written"
            );

            Ok(RegionOutput {
                units: collection.len(),
                files: 1,
                bytes,
            })
        });
        summary.record(region, result);
    }

    summary
}

/// One file per municipality, `{code}.json`, holding its oaza areas, and a final
/// `meta_file` counting the oaza of every municipality written by the batch.
///
/// Only writing the meta file can fail the whole call.
pub fn run_oaza<S>(
    source: &S,
    keys: &OazaKeys,
    meta_file: &str,
    settings: &BatchSettings,
) -> Result<BatchSummary, Error>
where
    S: FeatureSource + ?Sized,
{
    let aggregator = Aggregator::new(settings.quantizer);
    let mut summary = BatchSummary::default();
    let mut meta = Meta::new();

    for &region in &settings.regions {
        let _span = info_span!("region", region, prefecture = prefectures::name(region)).entered();

        let result = fetch_with_retry(source, region, settings.retry).and_then(|raw| {
            let mut region_meta = Meta::new();
            let mut output = RegionOutput::default();

            for (code, features) in partition_by_parent(raw.features, &keys.parent_field) {
                let collection = aggregator.aggregate(features, keys);
                if collection.is_empty() {
                    continue;
                }
                output.bytes += settings.output.write(&format!("{code}.json"), &collection)?;
                output.files += 1;
                output.units += collection.len();
                region_meta.insert(code, collection.len());
            }

            info!(
                municipalities = region_meta.len(),
                oaza = output.units,
                kb = output.bytes / 1024,
                "Region written"
            );
            meta.extend(region_meta);
            Ok(output)
        });
        summary.record(region, result);
    }

    summary.bytes += settings.output.write(meta_file, &meta)?;
    summary.files += 1;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use std::cell::Cell;

    struct Flaky {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
    }

    impl FeatureSource for Flaky {
        fn fetch(&self, _region: u8, attempt: u32) -> Result<RawCollection, RetrievalError> {
            assert_eq!(attempt, self.calls.get());
            self.calls.set(self.calls.get() + 1);
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(RetrievalError::Unavailable("timed out".to_string()));
            }
            Ok(RawCollection::default())
        }
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures_left: Cell::new(failures),
            calls: Cell::new(0),
        }
    }

    fn once() -> RetryPolicy {
        RetryPolicy {
            retries: 1,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn no_retry_by_default() {
        let source = flaky(1);
        let err = fetch_with_retry(&source, 5, RetryPolicy::NONE).unwrap_err();
        assert_eq!(source.calls.get(), 1);
        insta::assert_snapshot!(err, @"Region 05 could not be retrieved: timed out");
    }

    #[test]
    fn a_single_retry_recovers() {
        let source = flaky(1);
        fetch_with_retry(&source, 5, once()).unwrap();
        assert_eq!(source.calls.get(), 2);
    }

    #[test]
    fn a_single_retry_only() {
        let source = flaky(2);
        let err = fetch_with_retry(&source, 12, once()).unwrap_err();
        assert_eq!(source.calls.get(), 2);
        assert!(matches!(err, Error::Retrieval { region: 12, .. }));
    }

    #[test]
    fn exit_status_fails_on_any_region() {
        let failed = BatchSummary {
            regions_ok: 46,
            failures: vec![RegionFailure {
                region: 5,
                error: Error::Retrieval {
                    region: 5,
                    source: RetrievalError::Unavailable("timed out".to_string()),
                },
            }],
            ..BatchSummary::default()
        };
        let ok = BatchSummary {
            regions_ok: 47,
            ..BatchSummary::default()
        };

        assert_eq!(exit_status(&[]), 0);
        assert_eq!(exit_status(std::slice::from_ref(&ok)), 0);
        assert_eq!(exit_status(std::slice::from_ref(&failed)), 1);
        assert_eq!(exit_status(&[ok, failed]), 1);
    }

    #[test]
    fn success_does_not_retry() {
        let source = flaky(0);
        fetch_with_retry(&source, 1, once()).unwrap();
        assert_eq!(source.calls.get(), 1);
    }
}

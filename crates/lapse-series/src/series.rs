//! The cached, transformed view over a frame source.
//!
//! An [`ImageSeries`] ties together one [`FrameSource`], one
//! [`TransformPipeline`] and two independent memoization tables:
//!
//! - a raw cache keyed by frame number, and
//! - a transform cache keyed by `(frame number, pipeline fingerprint)`.
//!
//! Because the fingerprint is part of the key, any configuration change
//! makes prior transform entries unreachable without bookkeeping; they
//! are purged eagerly with
//! [`invalidate_transforms`](ImageSeries::invalidate_transforms) to
//! bound memory. Caching is strictly an optimization — disabling it
//! (capacity 0) changes latency, never results.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use lapse_pipeline::{
    Frame, Gray32FImage, PipelineRecord, Registry, Subtraction, Transform, TransformPipeline,
};

use crate::cache::{BoundedCache, CacheStats};
use crate::error::SeriesError;
use crate::source::FrameSource;

/// Default raw-frame cache capacity.
pub const READ_CACHE_SIZE: usize = 1024;

/// Default transformed-frame cache capacity.
pub const TRANSFORM_CACHE_SIZE: usize = 1024;

struct TaggedFrame {
    fingerprint: u64,
    frame: Frame,
}

/// A frame source with an exclusive transform pipeline and caches.
pub struct ImageSeries {
    source: Arc<dyn FrameSource>,
    registry: Registry,
    pipeline: TransformPipeline,
    raw_cache: RefCell<BoundedCache<i64, Frame>>,
    transform_cache: RefCell<BoundedCache<(i64, u64), TaggedFrame>>,
}

impl ImageSeries {
    /// Create a series over `source` with the standard step registry
    /// and default cache capacities.
    #[must_use]
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self::with_registry(source, Registry::standard())
    }

    /// Create a series with an explicit step registry.
    ///
    /// The pipeline snapshots `registry` now; later mutation of the
    /// caller's copy does not affect this series.
    #[must_use]
    pub fn with_registry(source: Arc<dyn FrameSource>, registry: Registry) -> Self {
        let pipeline = TransformPipeline::from_registry(&registry);
        Self {
            source,
            registry,
            pipeline,
            raw_cache: RefCell::new(BoundedCache::new(READ_CACHE_SIZE)),
            transform_cache: RefCell::new(BoundedCache::new(TRANSFORM_CACHE_SIZE)),
        }
    }

    /// Replace both cache capacities, dropping current contents.
    ///
    /// Capacity 0 disables a cache: every call recomputes.
    pub fn set_cache_capacities(&mut self, raw: usize, transform: usize) {
        self.raw_cache = RefCell::new(BoundedCache::new(raw));
        self.transform_cache = RefCell::new(BoundedCache::new(transform));
    }

    /// The underlying frame source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }

    /// The registry this series was built with.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of frames in the series.
    #[must_use]
    pub fn count(&self) -> usize {
        self.source.count()
    }

    /// Approximate acquisition time of frame `num` (Unix seconds).
    #[must_use]
    pub fn approximate_time(&self, num: i64) -> Option<f64> {
        self.source.approximate_time(num)
    }

    /// The transform pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    /// The transform pipeline, mutably.
    ///
    /// Configuration must not be mutated while a batch run is
    /// executing; the cached reader keys on the current fingerprint, so
    /// mutation between reads is always safe.
    pub const fn pipeline_mut(&mut self) -> &mut TransformPipeline {
        &mut self.pipeline
    }

    /// Read the raw frame `num`, consulting the raw cache.
    ///
    /// # Errors
    ///
    /// Propagates source failures ([`SeriesError::FrameOutOfRange`],
    /// decode errors).
    pub fn read_raw(&self, num: i64) -> Result<Frame, SeriesError> {
        if let Some(frame) = self.raw_cache.borrow_mut().get(&num) {
            return Ok(frame.clone());
        }
        let frame = self.source.read_raw(num)?;
        self.raw_cache.borrow_mut().insert(num, frame.clone());
        Ok(frame)
    }

    /// Read frame `num` with all active transforms applied, consulting
    /// the transform cache under the current pipeline fingerprint.
    ///
    /// # Errors
    ///
    /// Propagates source and transform failures, and surfaces
    /// [`SeriesError::CacheInvalidation`] if a cached entry disagrees
    /// with the fingerprint it is stored under (a fatal bug, not a
    /// recoverable condition).
    pub fn read(&self, num: i64) -> Result<Frame, SeriesError> {
        let fingerprint = self.pipeline.fingerprint();
        let key = (num, fingerprint);
        {
            let mut cache = self.transform_cache.borrow_mut();
            if let Some(tagged) = cache.get(&key) {
                if tagged.fingerprint != fingerprint {
                    return Err(SeriesError::CacheInvalidation {
                        num,
                        expected: fingerprint,
                        found: tagged.fingerprint,
                    });
                }
                return Ok(tagged.frame.clone());
            }
        }

        let raw = self.read_raw(num)?;
        let transformed = self.pipeline.apply_all(&raw)?;
        self.transform_cache.borrow_mut().insert(
            key,
            TaggedFrame {
                fingerprint,
                frame: transformed.clone(),
            },
        );
        Ok(transformed)
    }

    /// Eagerly purge all transformed-frame cache entries.
    ///
    /// Entries under stale fingerprints are already unreachable; this
    /// reclaims their memory.
    pub fn invalidate_transforms(&self) {
        self.transform_cache.borrow_mut().clear();
        tracing::debug!("transform cache purged");
    }

    /// Introspection snapshots of the raw and transform caches.
    #[must_use]
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (
            self.raw_cache.borrow().stats(),
            self.transform_cache.borrow().stats(),
        )
    }

    /// Materialize derived pipeline state (the subtraction reference
    /// image) so that subsequent [`read`](Self::read) calls are pure.
    ///
    /// Idempotent: a reference already computed under the current
    /// pipeline prefix is kept.
    ///
    /// # Errors
    ///
    /// Propagates read and transform failures for the reference frames.
    pub fn prepare(&mut self) -> Result<(), SeriesError> {
        let Some((frames, prefix_fingerprint)) = self.pending_subtraction() else {
            return Ok(());
        };

        tracing::debug!(?frames, "materializing subtraction reference");
        let mut accumulator: Option<Gray32FImage> = None;
        for &num in &frames {
            let raw = self.read_raw(num)?;
            let transformed = self.pipeline.apply_prefix(&raw, Subtraction::NAME)?;
            let gray = transformed.to_gray_f32();
            accumulator = Some(match accumulator {
                None => gray,
                Some(mut acc) => {
                    if acc.dimensions() != gray.dimensions() {
                        let (reference_width, reference_height) = acc.dimensions();
                        let (frame_width, frame_height) = gray.dimensions();
                        return Err(SeriesError::Pipeline(
                            lapse_pipeline::PipelineError::ReferenceSizeMismatch {
                                reference_width,
                                reference_height,
                                frame_width,
                                frame_height,
                            },
                        ));
                    }
                    for (dst, src) in acc.iter_mut().zip(gray.as_raw()) {
                        *dst += *src;
                    }
                    acc
                }
            });
        }

        if let Some(mut mean) = accumulator {
            #[allow(clippy::cast_precision_loss)]
            let n = frames.len() as f32;
            for value in mean.iter_mut() {
                *value /= n;
            }
            if let Some(step) = self.pipeline.step_mut(Subtraction::NAME) {
                if let Some(subtraction) = step.as_any_mut().downcast_mut::<Subtraction>() {
                    subtraction.set_reference_image(prefix_fingerprint, mean);
                }
            }
        }
        Ok(())
    }

    /// Replace the pipeline from a saved configuration record
    /// (e.g. one embedded in analysis metadata).
    ///
    /// # Errors
    ///
    /// Returns [`lapse_pipeline::PipelineError::UnknownStepType`] when
    /// the record names a step type absent from this series' registry.
    pub fn apply_transform_record(&mut self, record: &PipelineRecord) -> Result<(), SeriesError> {
        self.pipeline = TransformPipeline::from_record(&self.registry, record)?;
        Ok(())
    }

    /// Save the transform configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Propagates I/O and encoding failures.
    pub fn save_transforms(&self, path: &Path) -> Result<(), SeriesError> {
        self.pipeline.save(path)?;
        Ok(())
    }

    /// Load a transform configuration saved by
    /// [`save_transforms`](Self::save_transforms).
    ///
    /// # Errors
    ///
    /// Propagates I/O, parse, and unknown-step failures.
    pub fn load_transforms(&mut self, path: &Path) -> Result<(), SeriesError> {
        self.pipeline = TransformPipeline::load(path, &self.registry)?;
        Ok(())
    }

    /// Whether an active subtraction step still needs its reference
    /// materialized, and under which prefix fingerprint.
    fn pending_subtraction(&self) -> Option<(Vec<i64>, u64)> {
        let step = self.pipeline.step(Subtraction::NAME)?;
        if !step.enabled() || step.is_empty() {
            return None;
        }
        let subtraction = step.as_any().downcast_ref::<Subtraction>()?;
        let frames = subtraction.reference_frames();
        if frames.is_empty() {
            return None;
        }
        let prefix_fingerprint = self.pipeline.prefix_fingerprint(Subtraction::NAME);
        if subtraction.has_reference_for(prefix_fingerprint) {
            return None;
        }
        Some((frames, prefix_fingerprint))
    }
}

impl std::fmt::Debug for ImageSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSeries")
            .field("count", &self.count())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{GrayImage, Luma};
    use lapse_pipeline::{PipelineError, StepCore, Transform};

    use super::*;
    use crate::source::MemoryStack;

    fn gray_frame(value: u8) -> Frame {
        Frame::Gray8(GrayImage::from_pixel(4, 4, Luma([value])))
    }

    fn series_of(values: &[u8]) -> ImageSeries {
        let frames = values.iter().map(|&v| gray_frame(v)).collect();
        ImageSeries::new(Arc::new(MemoryStack::new(frames)))
    }

    /// Sentinel step that counts how many times `apply` runs.
    #[derive(Clone)]
    struct Counting {
        core: StepCore,
        calls: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                core: StepCore::new("counting"),
                calls,
            }
        }
    }

    impl Transform for Counting {
        fn core(&self) -> &StepCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut StepCore {
            &mut self.core
        }

        fn recognized_keys(&self) -> &'static [&'static str] {
            &["offset"]
        }

        fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(frame.clone())
        }

        fn boxed_clone(&self) -> Box<dyn Transform> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn counting_series(values: &[u8]) -> (ImageSeries, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);
        let mut registry = Registry::standard();
        registry
            .push(move || Box::new(Counting::new(Arc::clone(&factory_calls))))
            .unwrap();
        let frames = values.iter().map(|&v| gray_frame(v)).collect();
        let mut series =
            ImageSeries::with_registry(Arc::new(MemoryStack::new(frames)), registry);
        series
            .pipeline_mut()
            .step_mut("counting")
            .unwrap()
            .set("offset", serde_json::json!(0))
            .unwrap();
        (series, calls)
    }

    #[test]
    fn read_raw_hits_cache_on_second_call() {
        let series = series_of(&[10, 20]);
        let first = series.read_raw(0).unwrap();
        let second = series.read_raw(0).unwrap();
        assert_eq!(first, second);

        let (raw_stats, _) = series.cache_stats();
        assert_eq!(raw_stats.hits, 1);
        assert_eq!(raw_stats.misses, 1);
    }

    #[test]
    fn transformed_read_is_cached_under_fingerprint() {
        let (series, calls) = counting_series(&[10, 20]);
        let _ = series.read(0).unwrap();
        let _ = series.read(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parameter_mutation_invalidates_cached_transforms() {
        let (mut series, calls) = counting_series(&[10, 20]);
        let _ = series.read(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Mutating any step's payload changes the fingerprint; the
        // previously cached frame 0 must be recomputed.
        series
            .pipeline_mut()
            .step_mut("counting")
            .unwrap()
            .set("offset", serde_json::json!(1))
            .unwrap();
        let _ = series.read(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn enable_flag_mutation_invalidates_cached_transforms() {
        let (mut series, calls) = counting_series(&[10]);
        let _ = series.read(0).unwrap();
        series
            .pipeline_mut()
            .step_mut("counting")
            .unwrap()
            .set_enabled(false);
        let _ = series.read(0).unwrap();
        series
            .pipeline_mut()
            .step_mut("counting")
            .unwrap()
            .set_enabled(true);
        let _ = series.read(0).unwrap();
        // The disabled read never returned the stale transformed frame:
        // it recomputed under the new fingerprint without running the
        // step. Re-enabling reverts to the original fingerprint, whose
        // entry is still cached.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (_, transform_stats) = series.cache_stats();
        assert_eq!(transform_stats.hits, 1);
    }

    #[test]
    fn caching_disabled_gives_identical_results() {
        let (cached, _) = counting_series(&[10, 20, 30]);
        let (mut uncached, calls) = counting_series(&[10, 20, 30]);
        uncached.set_cache_capacities(0, 0);

        for num in 0..3 {
            let a = cached.read(num).unwrap();
            let b = uncached.read(num).unwrap();
            assert_eq!(a, b);
        }
        // Re-reading without a cache recomputes every time.
        let _ = uncached.read(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn invalidate_transforms_purges_entries() {
        let (series, _) = counting_series(&[10]);
        let _ = series.read(0).unwrap();
        let (_, stats) = series.cache_stats();
        assert_eq!(stats.len, 1);

        series.invalidate_transforms();
        let (_, stats) = series.cache_stats();
        assert_eq!(stats.len, 0);
    }

    #[test]
    fn prepare_materializes_subtraction_reference() {
        let mut series = series_of(&[10, 20, 60]);
        series
            .pipeline_mut()
            .step_mut("subtraction")
            .unwrap()
            .set("reference", serde_json::json!([0, 1]))
            .unwrap();
        series.prepare().unwrap();

        // Reference is the mean of frames 0 and 1 (15); frame 2 reads
        // as 60 - 15 = 45.
        let out = series.read(2).unwrap();
        assert!((out.mean() - 45.0).abs() < 1e-6);
    }

    #[test]
    fn prepare_is_idempotent_and_refreshes_on_prefix_change() {
        let mut series = series_of(&[10, 20, 60]);
        series
            .pipeline_mut()
            .step_mut("subtraction")
            .unwrap()
            .set("reference", serde_json::json!([0]))
            .unwrap();
        series.prepare().unwrap();
        series.prepare().unwrap();
        assert!((series.read(2).unwrap().mean() - 50.0).abs() < 1e-6);

        // Changing a prefix step invalidates the materialized reference.
        series
            .pipeline_mut()
            .step_mut("crop")
            .unwrap()
            .set("zone", serde_json::json!([0, 0, 2, 2]))
            .unwrap();
        series.prepare().unwrap();
        assert!((series.read(2).unwrap().mean() - 50.0).abs() < 1e-6);
        assert_eq!(series.read(2).unwrap().dimensions(), (2, 2));
    }

    #[test]
    fn save_and_load_transforms_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transforms.json");

        let mut series = series_of(&[10]);
        series
            .pipeline_mut()
            .step_mut("rotation")
            .unwrap()
            .set("angle", serde_json::json!(12.0))
            .unwrap();
        series.save_transforms(&path).unwrap();

        let mut fresh = series_of(&[10]);
        fresh.load_transforms(&path).unwrap();
        assert_eq!(
            fresh.pipeline().fingerprint(),
            series.pipeline().fingerprint(),
        );
    }
}

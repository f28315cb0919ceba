use glam::IVec2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::*;
use crate::exposure::{MaskPlane, NO_DATA_VARIANCE};
use crate::geom::Box2I;
use crate::psf::{ModelPsf, PsfMatchResult};
use crate::repository::InMemoryRepository;
use crate::testing::{constant_exposure, exposure_from_planes, init_tracing, tile_wcs};
use crate::tile::{PatchInfo, TractId, TractInfo};
use crate::wcs::SkyCoord;

const PATCH_BBOX: Box2I = Box2I::new(0, 0, 39, 39);

fn sky_info() -> SkyInfo {
    let tract = TractInfo {
        id: TractId(0),
        ctr_coord: SkyCoord::new(150.0, 2.0),
        wcs: tile_wcs(),
        bbox: PATCH_BBOX,
    };
    let patch = PatchInfo::new((0, 0), PATCH_BBOX, PATCH_BBOX).unwrap();
    SkyInfo::new(tract, patch)
}

fn accumulator() -> CoaddAccumulator {
    CoaddAccumulator::new(PATCH_BBOX, tile_wcs(), MaskPlane::Bad.bit(), f32::NAN).unwrap()
}

fn patch_id() -> DataId {
    DataId::new("tract=0 patch=0,0")
}

/// Repository with one uniform calexp per `(value, variance)` pair.
fn repository_with(inputs: &[(f32, f32)]) -> (InMemoryRepository, Vec<DataId>) {
    let repo = InMemoryRepository::new();
    let mut ids = Vec::new();
    for (i, &(value, variance)) in inputs.iter().enumerate() {
        let id = DataId::new(format!("visit={} ccd=0", i));
        let exposure = constant_exposure(PATCH_BBOX, value, variance);
        repo.put("calexp", &id, Dataset::Exposure(exposure)).unwrap();
        ids.push(id);
    }
    (repo, ids)
}

fn assert_close(a: f32, b: f32, tol: f32) {
    assert!((a - b).abs() < tol, "{} != {} (tol {})", a, b, tol);
}

// ============================================================================
// Accumulator
// ============================================================================

#[test]
fn test_inverse_variance_weighted_mean() {
    let mut acc = accumulator();
    acc.add_exposure(&constant_exposure(PATCH_BBOX, 10.0, 1.0)).unwrap();
    acc.add_exposure(&constant_exposure(PATCH_BBOX, 20.0, 4.0)).unwrap();
    let coadd = acc.get_exposure();

    // (10·1 + 20·0.25) / 1.25 = 12, variance 1/1.25 = 0.8
    assert_close(coadd.image[(7, 7)], 12.0, 1e-5);
    assert_close(coadd.variance[(7, 7)], 0.8, 1e-6);
    assert_eq!(acc.input_count()[(7, 7)], 2);
    assert_eq!(acc.exposure_count(), 2);
    assert!((acc.weight_sum()[(7, 7)] - 1.25).abs() < 1e-12);
}

#[test]
fn test_single_exposure_passes_through() {
    let mut acc = accumulator();
    let stats = acc.add_exposure(&constant_exposure(PATCH_BBOX, 3.5, 2.0)).unwrap();
    assert_eq!(stats.pixels_used, 40 * 40);
    assert_eq!(stats.pixels_rejected, 0);

    let coadd = acc.get_exposure();
    assert!(coadd.image.pixels().iter().all(|&v| v == 3.5));
    assert!(coadd.variance.pixels().iter().all(|&v| v == 2.0));
    assert!(coadd.psf.is_none());
    assert!(coadd.calib.is_none());
}

#[test]
fn test_uncovered_pixels_are_no_data() {
    let mut acc = accumulator();
    acc.add_exposure(&constant_exposure(Box2I::new(0, 0, 19, 39), 1.0, 1.0)).unwrap();
    let coadd = acc.get_exposure();
    let no_data = MaskPlane::NoData.bit();

    assert_eq!(coadd.mask[(5, 5)] & no_data, 0);
    assert!(coadd.image[(30, 5)].is_nan());
    assert_eq!(coadd.variance[(30, 5)], NO_DATA_VARIANCE);
    assert_ne!(coadd.mask[(30, 5)] & no_data, 0);
    assert_eq!(acc.input_count()[(30, 5)], 0);
}

#[test]
fn test_custom_no_data_value() {
    let acc = CoaddAccumulator::new(PATCH_BBOX, tile_wcs(), 0, -999.0).unwrap();
    let coadd = acc.get_exposure();
    assert!(coadd.image.pixels().iter().all(|&v| v == -999.0));
    assert_eq!(coadd.count_masked(MaskPlane::NoData.bit()), 40 * 40);
}

#[test]
fn test_rejects_bad_nonfinite_and_nonpositive_variance() {
    let bad = MaskPlane::Bad.bit();
    let exposure = exposure_from_planes(
        IVec2::new(0, 0),
        5,
        1,
        vec![1.0, 2.0, f32::NAN, 4.0, 5.0],
        vec![0, bad, 0, 0, 0],
        vec![1.0, 1.0, 1.0, 0.0, f32::INFINITY],
    );
    let mut acc = accumulator();
    let stats = acc.add_exposure(&exposure).unwrap();
    assert_eq!(stats, AddStats { pixels_used: 1, pixels_rejected: 4 });

    let coadd = acc.get_exposure();
    assert_eq!(coadd.image[(0, 0)], 1.0);
    for x in 1..5 {
        assert_ne!(coadd.mask[(x, 0)] & MaskPlane::NoData.bit(), 0);
    }
}

#[test]
fn test_no_data_input_never_contributes() {
    let mut exposure = constant_exposure(PATCH_BBOX, 10.0, 1.0);
    exposure.mask[(3, 3)] = MaskPlane::NoData.bit();
    let mut acc = CoaddAccumulator::new(PATCH_BBOX, tile_wcs(), 0, f32::NAN).unwrap();
    acc.add_exposure(&exposure).unwrap();
    assert_eq!(acc.input_count()[(3, 3)], 0);
    assert!(acc.get_exposure().image[(3, 3)].is_nan());
}

#[test]
fn test_partially_masked_pixel_uses_unmasked_inputs() {
    let mut masked = constant_exposure(PATCH_BBOX, 10.0, 1.0);
    masked.mask[(4, 4)] = MaskPlane::Bad.bit();
    let mut acc = accumulator();
    acc.add_exposure(&masked).unwrap();
    acc.add_exposure(&constant_exposure(PATCH_BBOX, 20.0, 4.0)).unwrap();
    let coadd = acc.get_exposure();

    assert_eq!(coadd.image[(4, 4)], 20.0);
    assert_eq!(coadd.variance[(4, 4)], 4.0);
    assert_eq!(coadd.mask[(4, 4)], 0);
    assert_eq!(acc.input_count()[(4, 4)], 1);
    // (10·1 + 20·0.25) / 1.25 = 12 where both contribute
    assert_close(coadd.image[(5, 4)], 12.0, 1e-5);
    assert_close(coadd.variance[(5, 4)], 0.8, 1e-6);
}

#[test]
fn test_mask_bits_of_contributors_are_ored() {
    let detected = MaskPlane::Detected.bit();
    let mut a = constant_exposure(PATCH_BBOX, 1.0, 1.0);
    a.mask[(2, 2)] = detected;
    let mut acc = accumulator();
    acc.add_exposure(&a).unwrap();
    acc.add_exposure(&constant_exposure(PATCH_BBOX, 1.0, 1.0)).unwrap();
    let coadd = acc.get_exposure();
    assert_eq!(coadd.mask[(2, 2)], detected);
    assert_eq!(coadd.mask[(3, 3)], 0);
}

#[test]
fn test_non_overlapping_exposure_adds_nothing() {
    let mut acc = accumulator();
    let stats = acc
        .add_exposure(&constant_exposure(Box2I::new(100, 100, 119, 119), 1.0, 1.0))
        .unwrap();
    assert_eq!(stats, AddStats::default());
    assert_eq!(acc.exposure_count(), 0);
}

#[test]
fn test_partial_overlap_uses_only_overlap() {
    let mut acc = accumulator();
    let stats = acc
        .add_exposure(&constant_exposure(Box2I::new(30, 30, 49, 49), 1.0, 1.0))
        .unwrap();
    assert_eq!(stats.pixels_used, 10 * 10);
    assert_eq!(acc.input_count()[(35, 35)], 1);
    assert_eq!(acc.input_count()[(29, 29)], 0);
}

#[test]
fn test_foreign_wcs_is_geometry_mismatch() {
    let mut exposure = constant_exposure(PATCH_BBOX, 1.0, 1.0);
    exposure.wcs = crate::wcs::Wcs::from_scale_rotation(
        glam::DVec2::new(50.0, 50.0),
        SkyCoord::new(151.0, 2.0),
        0.2,
        0.0,
    );
    let mut acc = accumulator();
    assert!(matches!(
        acc.add_exposure(&exposure),
        Err(Error::GeometryMismatch(_))
    ));
}

#[test]
fn test_empty_bbox_is_invalid() {
    let result = CoaddAccumulator::new(Box2I::empty(), tile_wcs(), 0, f32::NAN);
    assert!(matches!(result, Err(Error::InvalidParameter { .. })));
}

#[test]
fn test_no_data_is_always_bad() {
    let acc = CoaddAccumulator::new(PATCH_BBOX, tile_wcs(), 0, f32::NAN).unwrap();
    assert_eq!(acc.bad_mask(), MaskPlane::NoData.bit());
}

#[test]
fn test_get_exposure_is_idempotent() {
    let mut acc = accumulator();
    acc.add_exposure(&constant_exposure(PATCH_BBOX, 4.0, 2.0)).unwrap();
    let first = acc.get_exposure();
    let second = acc.get_exposure();
    assert_eq!(first.image, second.image);
    assert_eq!(first.variance, second.variance);
    assert_eq!(first.mask, second.mask);
}

#[test]
fn test_result_independent_of_insertion_order() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut exposures: Vec<Exposure> = (0..8)
        .map(|_| {
            let mut e = constant_exposure(PATCH_BBOX, 0.0, 1.0);
            for v in e.image.pixels_mut() {
                *v = rng.random_range(-10.0..10.0);
            }
            for v in e.variance.pixels_mut() {
                *v = rng.random_range(0.5..5.0);
            }
            e
        })
        .collect();

    let mut forward = accumulator();
    for e in &exposures {
        forward.add_exposure(e).unwrap();
    }
    exposures.shuffle(&mut rng);
    let mut shuffled = accumulator();
    for e in &exposures {
        shuffled.add_exposure(e).unwrap();
    }

    let (a, b) = (forward.get_exposure(), shuffled.get_exposure());
    for (x, y) in a.image.pixels().iter().zip(b.image.pixels()) {
        assert_close(*x, *y, 1e-4);
    }
    for (x, y) in a.variance.pixels().iter().zip(b.variance.pixels()) {
        assert_close(*x, *y, 1e-5);
    }
}

#[test]
fn test_merge_equals_sequential() {
    let inputs = [(10.0, 4.0), (12.0, 2.0), (9.0, 1.0)];

    let mut sequential = accumulator();
    for &(v, var) in &inputs {
        sequential.add_exposure(&constant_exposure(PATCH_BBOX, v, var)).unwrap();
    }

    let mut left = accumulator();
    left.add_exposure(&constant_exposure(PATCH_BBOX, 10.0, 4.0)).unwrap();
    let mut right = accumulator();
    right.add_exposure(&constant_exposure(PATCH_BBOX, 12.0, 2.0)).unwrap();
    right.add_exposure(&constant_exposure(PATCH_BBOX, 9.0, 1.0)).unwrap();
    left.merge(&right).unwrap();

    assert_eq!(left.exposure_count(), 3);
    assert_eq!(left.input_count(), sequential.input_count());
    let (a, b) = (left.get_exposure(), sequential.get_exposure());
    assert_close(a.image[(0, 0)], b.image[(0, 0)], 1e-5);
    assert_close(a.variance[(0, 0)], b.variance[(0, 0)], 1e-6);
}

#[test]
fn test_merge_rejects_different_geometry() {
    let mut acc = accumulator();
    let other =
        CoaddAccumulator::new(Box2I::new(0, 0, 9, 9), tile_wcs(), MaskPlane::Bad.bit(), f32::NAN)
            .unwrap();
    assert!(matches!(acc.merge(&other), Err(Error::GeometryMismatch(_))));
}

// ============================================================================
// Task
// ============================================================================

#[test]
fn test_three_exposure_coadd() {
    init_tracing();
    let (repo, ids) = repository_with(&[(10.0, 4.0), (10.0, 4.0), (10.0, 1.0)]);
    let task = CoaddTask::new(CoaddConfig::default()).unwrap();
    let result = task
        .run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();

    assert_eq!(result.exposure.bbox(), PATCH_BBOX);
    assert_close(result.exposure.image[(20, 20)], 10.0, 1e-4);
    assert_close(result.exposure.variance[(20, 20)], 1.0 / 1.5, 1e-4);
    assert_eq!(result.input_count[(20, 20)], 3);
    assert_eq!(result.diagnostics.contributed, ids);
    assert!(result.diagnostics.skipped.is_empty());
    assert_eq!(
        result.exposure.calib,
        Some(PhotoCalib::from_zero_point(task.config().coadd_zero_point))
    );
}

#[test]
fn test_writes_coadd_and_warps() {
    let (repo, ids) = repository_with(&[(10.0, 4.0), (10.0, 1.0)]);
    let task = CoaddTask::new(CoaddConfig::default()).unwrap();
    task.run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();

    assert!(repo.contains("deepCoadd", &patch_id()));
    assert_eq!(repo.ids("deepCoadd_tempExp").len(), 2);
    assert!(repo.contains("deepCoadd_tempExp", &ids[0].joined(&patch_id())));
    // No model PSF without matching
    assert!(!repo.contains("deepCoadd_initPsf", &patch_id()));
}

#[test]
fn test_no_write_leaves_repository_untouched() {
    let (repo, ids) = repository_with(&[(10.0, 4.0)]);
    let config = CoaddConfig {
        do_write: false,
        ..CoaddConfig::default()
    };
    let before = repo.len();
    CoaddTask::new(config)
        .unwrap()
        .run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();
    assert_eq!(repo.len(), before);
}

#[test]
fn test_empty_id_list_is_empty_input_set() {
    let repo = InMemoryRepository::new();
    let task = CoaddTask::new(CoaddConfig::default()).unwrap();
    let result = task.run(&repo, &sky_info(), &patch_id(), &[], &CancelToken::new());
    assert!(matches!(result, Err(Error::EmptyInputSet)));
}

#[test]
fn test_all_inputs_failing_is_empty_input_set() {
    let repo = InMemoryRepository::new();
    let ids = vec![DataId::new("visit=1"), DataId::new("visit=2")];
    let task = CoaddTask::new(CoaddConfig::default()).unwrap();
    let result = task.run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new());
    assert!(matches!(result, Err(Error::EmptyInputSet)));
    assert!(!repo.contains("deepCoadd", &patch_id()));
}

#[test]
fn test_failed_exposure_is_skipped_not_fatal() {
    let (repo, mut ids) = repository_with(&[(10.0, 4.0), (10.0, 1.0)]);
    let missing = DataId::new("visit=99 ccd=0");
    ids.insert(1, missing.clone());

    let far = DataId::new("visit=100 ccd=0");
    let exposure = constant_exposure(Box2I::new(500, 500, 519, 519), 10.0, 1.0);
    repo.put("calexp", &far, Dataset::Exposure(exposure)).unwrap();
    ids.push(far.clone());

    let mut uncalibrated = constant_exposure(PATCH_BBOX, 10.0, 1.0);
    uncalibrated.calib = None;
    let no_calib = DataId::new("visit=101 ccd=0");
    repo.put("calexp", &no_calib, Dataset::Exposure(uncalibrated)).unwrap();
    ids.push(no_calib.clone());

    let task = CoaddTask::new(CoaddConfig::default()).unwrap();
    let result = task
        .run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();

    assert_eq!(result.diagnostics.contributed.len(), 2);
    let skipped = &result.diagnostics.skipped;
    assert_eq!(skipped.len(), 3);
    assert_eq!(skipped[0].0, missing);
    assert!(matches!(skipped[0].1, ExposureError::LoadFailure { .. }));
    assert_eq!(skipped[1].0, far);
    assert!(matches!(skipped[1].1, ExposureError::NoOverlap));
    assert_eq!(skipped[2].0, no_calib);
    assert!(matches!(skipped[2].1, ExposureError::CalibrationMissing));
    assert_close(result.exposure.variance[(0, 0)], 0.8, 1e-5);
}

#[test]
fn test_fully_masked_exposure_counts_as_no_overlap() {
    let (repo, mut ids) = repository_with(&[(10.0, 1.0)]);
    let mut masked = constant_exposure(PATCH_BBOX, 10.0, 1.0);
    masked.mask.fill(MaskPlane::Bad.bit());
    let id = DataId::new("visit=7 ccd=0");
    repo.put("calexp", &id, Dataset::Exposure(masked)).unwrap();
    ids.push(id.clone());

    let result = CoaddTask::new(CoaddConfig::default())
        .unwrap()
        .run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();
    assert_eq!(result.diagnostics.contributed, vec![ids[0].clone()]);
    assert_eq!(result.diagnostics.skipped.len(), 1);
    assert!(matches!(result.diagnostics.skipped[0].1, ExposureError::NoOverlap));
    assert!(!repo.contains("deepCoadd_tempExp", &id.joined(&patch_id())));
}

#[test]
fn test_cancelled_run_returns_cancelled() {
    let (repo, ids) = repository_with(&[(10.0, 4.0), (10.0, 1.0)]);
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(cancel.is_cancelled());

    let result = CoaddTask::new(CoaddConfig::default())
        .unwrap()
        .run(&repo, &sky_info(), &patch_id(), &ids, &cancel);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!repo.contains("deepCoadd", &patch_id()));
}

#[test]
fn test_small_batches_keep_input_order() {
    let (repo, mut ids) = repository_with(&[(10.0, 4.0), (10.0, 4.0), (10.0, 1.0), (10.0, 2.0)]);
    let missing = DataId::new("visit=99 ccd=0");
    ids.insert(2, missing.clone());

    let task = CoaddTask::new(CoaddConfig::default())
        .unwrap()
        .with_batch_size(2);
    assert_eq!(task.batch_size(), 2);
    let result = task
        .run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();

    let expected: Vec<DataId> = ids.iter().filter(|&id| *id != missing).cloned().collect();
    assert_eq!(result.diagnostics.contributed, expected);
    assert_eq!(result.diagnostics.skipped.len(), 1);
    assert_eq!(result.diagnostics.skipped[0].0, missing);
    assert_eq!(result.input_count[(20, 20)], 4);
    // 1 / (0.25 + 0.25 + 1 + 0.5)
    assert_close(result.exposure.variance[(20, 20)], 0.5, 1e-5);
}

#[test]
fn test_zero_batch_size_is_clamped() {
    let task = CoaddTask::new(CoaddConfig::default())
        .unwrap()
        .with_batch_size(0);
    assert_eq!(task.batch_size(), 1);
}

/// Cancels the run when `trigger` is loaded.
struct CancellingRepository {
    inner: InMemoryRepository,
    trigger: DataId,
    cancel: CancelToken,
}

impl Repository for CancellingRepository {
    fn get(&self, dataset_type: &str, id: &DataId) -> Option<Dataset> {
        if *id == self.trigger {
            self.cancel.cancel();
        }
        self.inner.get(dataset_type, id)
    }

    fn put(&self, dataset_type: &str, id: &DataId, dataset: Dataset) -> Result<(), Error> {
        self.inner.put(dataset_type, id, dataset)
    }
}

#[test]
fn test_cancel_between_batches_stops_run() {
    let (inner, ids) = repository_with(&[(10.0, 4.0), (10.0, 4.0), (10.0, 1.0)]);
    let cancel = CancelToken::new();
    let repo = CancellingRepository {
        inner,
        trigger: ids[1].clone(),
        cancel: cancel.clone(),
    };

    let result = CoaddTask::new(CoaddConfig::default())
        .unwrap()
        .with_batch_size(1)
        .run(&repo, &sky_info(), &patch_id(), &ids, &cancel);

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(repo.inner.contains("deepCoadd_tempExp", &ids[0].joined(&patch_id())));
    assert!(!repo.inner.contains("deepCoadd_tempExp", &ids[1].joined(&patch_id())));
    assert!(!repo.inner.contains("deepCoadd", &patch_id()));
}

/// Passes exposures through with the target PSF attached.
struct PassThroughMatcher;

impl PsfMatcher for PassThroughMatcher {
    fn match_exposure(
        &self,
        mut exposure: Exposure,
        target: &ModelPsf,
    ) -> Result<PsfMatchResult, ExposureError> {
        exposure.psf = Some(target.psf().clone());
        Ok(PsfMatchResult {
            exposure,
            matching_kernel: target.psf().kernel().clone(),
            cells: Vec::new(),
        })
    }
}

#[test]
fn test_matched_coadd_carries_model_psf() {
    let (repo, ids) = repository_with(&[(10.0, 4.0), (10.0, 1.0)]);
    // 0.2"/px tile, so 1.2" is 6 px; kernel 6 × 3 = 18, rounded up to odd
    let config = CoaddConfig::default().with_desired_fwhm(1.2);
    let task = CoaddTask::new(config)
        .unwrap()
        .with_matcher(Arc::new(PassThroughMatcher));
    let result = task
        .run(&repo, &sky_info(), &patch_id(), &ids, &CancelToken::new())
        .unwrap();

    let psf = result.exposure.psf.expect("coadd model psf");
    assert_eq!(psf.dimensions(), KernelDims::odd_square(18));
    assert_eq!(psf.dimensions().width, 19);
    assert!(repo.contains("deepCoadd_initPsf", &patch_id()));
}

#[test]
fn test_edge_interpolation_fills_holes() {
    let repo = InMemoryRepository::new();
    let id = DataId::new("visit=1 ccd=0");
    let exposure = constant_exposure(Box2I::new(0, 0, 19, 39), 5.0, 1.0);
    repo.put("calexp", &id, Dataset::Exposure(exposure)).unwrap();

    let config = CoaddConfig {
        do_interpolate_edges: true,
        do_write: false,
        ..CoaddConfig::default()
    };
    let result = CoaddTask::new(config)
        .unwrap()
        .run(&repo, &sky_info(), &patch_id(), &[id], &CancelToken::new())
        .unwrap();
    let coadd = result.exposure;
    assert_eq!(coadd.image[(30, 10)], 5.0);
    assert_ne!(coadd.mask[(30, 10)] & MaskPlane::Intrp.bit(), 0);
    assert_ne!(coadd.mask[(30, 10)] & MaskPlane::NoData.bit(), 0);
}

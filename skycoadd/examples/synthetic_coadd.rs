//! Example: Coadd a handful of synthetic exposures and flag primary sources
//!
//! Builds dithered star-field exposures with varying seeing and depth, puts
//! them into an in-memory repository, coadds them onto one patch with PSF
//! matching, then runs source classification on the result.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example synthetic_coadd
//! ```

use std::time::Instant;

use glam::DVec2;
use skycoadd::{
    process_coadd, Box2I, Buffer2, CancelToken, CoaddConfig, CoaddTask, DataId, Dataset,
    Exposure, InMemoryRepository, KernelDims, NearestTractSkyMap, PhotoCalib, Psf, Repository,
    SkyCoord, SkyInfo, SourceCatalog, SourceRecord, TractId, TractInfo, Wcs,
};

const PIXEL_SCALE_ARCSEC: f64 = 0.2;
const TRACT_CENTER: (f64, f64) = (150.0, 2.0);
const BACKGROUND: f32 = 100.0;
const STARS: [(f64, f64, f64); 4] = [
    (60.0, 60.0, 800.0),
    (140.0, 75.0, 500.0),
    (95.0, 150.0, 1200.0),
    (215.0, 210.0, 300.0),
];

/// (dither in pixels, PSF sigma in pixels, sky variance, zero point)
const VISITS: [((f64, f64), f64, f32, f64); 4] = [
    ((0.0, 0.0), 1.4, 25.0, 27.0),
    ((0.4, -0.3), 1.8, 16.0, 27.3),
    ((-0.7, 0.5), 1.2, 36.0, 26.8),
    ((0.2, 0.9), 2.0, 20.0, 27.1),
];

fn main() -> anyhow::Result<()> {
    let log_dir = std::env::temp_dir().join("skycoadd_logs");
    common::log_setup::setup_logging("info", &log_dir);

    let start = Instant::now();
    let tract = tract_info(TractId(0), TRACT_CENTER.0);
    let neighbour = tract_info(TractId(1), TRACT_CENTER.0 + 0.1);
    let patch = tract.patch_info((0, 0), (200, 200), 20)?;
    let sky_info = SkyInfo::new(tract.clone(), patch);
    let sky_map = NearestTractSkyMap::new(vec![tract, neighbour])?;

    let repository = InMemoryRepository::new();
    let ids = put_visits(&repository, &sky_info)?;
    let patch_id = DataId::new("tract=0 patch=0,0");

    let config = CoaddConfig::default().with_desired_fwhm(1.4);
    let task = CoaddTask::new(config.clone())?;
    let result = task.run(&repository, &sky_info, &patch_id, &ids, &CancelToken::new())?;
    tracing::info!(
        contributed = result.diagnostics.contributed.len(),
        skipped = result.diagnostics.skipped.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Coadd finished"
    );
    for (id, error) in &result.diagnostics.skipped {
        tracing::warn!(exposure = %id, %error, "Exposure skipped");
    }

    let detections = detect_catalog(&sky_info);
    repository.put(&config.dataset_type("_det"), &patch_id, Dataset::Sources(detections))?;

    let processed = process_coadd(&repository, &patch_id, &sky_info, &sky_map, &config)?;
    tracing::info!(
        total = processed.summary.total,
        primary = processed.summary.primary,
        variance_scale = processed.variance_scale,
        "Classified coadd sources"
    );
    for record in processed.sources.iter() {
        println!(
            "source {:>3} at ({:6.1}, {:6.1}): patch_inner={} tract_inner={} primary={}",
            record.id(),
            record.centroid.x,
            record.centroid.y,
            record.is_patch_inner,
            record.is_tract_inner,
            record.is_primary
        );
    }

    Ok(())
}

fn tract_wcs(ra: f64) -> Wcs {
    Wcs::from_scale_rotation(
        DVec2::new(120.0, 120.0),
        SkyCoord::new(ra, TRACT_CENTER.1),
        PIXEL_SCALE_ARCSEC,
        0.0,
    )
}

fn tract_info(id: TractId, ra: f64) -> TractInfo {
    TractInfo {
        id,
        ctr_coord: SkyCoord::new(ra, TRACT_CENTER.1),
        wcs: tract_wcs(ra),
        bbox: Box2I::new(0, 0, 239, 239),
    }
}

/// One calexp per visit, dithered against the tract frame.
fn put_visits(repository: &InMemoryRepository, sky_info: &SkyInfo) -> anyhow::Result<Vec<DataId>> {
    let bbox = sky_info.bbox();
    let mut ids = Vec::new();
    for (visit, &((dx, dy), sigma, variance, zero_point)) in VISITS.iter().enumerate() {
        let wcs = Wcs::from_scale_rotation(
            DVec2::new(120.0 + dx, 120.0 + dy),
            SkyCoord::new(TRACT_CENTER.0, TRACT_CENTER.1),
            PIXEL_SCALE_ARCSEC,
            0.0,
        );
        // Flux scale relative to the coadd zero point of 27
        let flux_scale = 10f64.powf(-0.4 * (27.0 - zero_point));
        let mut exposure = Exposure::from_constant(bbox, wcs, 0.0, variance)
            .with_psf(Psf::gaussian(sigma, KernelDims::odd_square(17))?)
            .with_calib(PhotoCalib::from_zero_point(zero_point));
        exposure.image = star_field(bbox, (dx, dy), sigma, flux_scale);

        let id = DataId::new(format!("visit={} ccd=0", visit));
        repository.put("calexp", &id, Dataset::Exposure(exposure))?;
        ids.push(id);
    }
    Ok(ids)
}

fn star_field(bbox: Box2I, dither: (f64, f64), sigma: f64, flux_scale: f64) -> Buffer2<f32> {
    let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);
    Buffer2::from_fn(bbox.width(), bbox.height(), |x, y| {
        let px = (bbox.x_min + x as i32) as f64 - dither.0;
        let py = (bbox.y_min + y as i32) as f64 - dither.1;
        let stars: f64 = STARS
            .iter()
            .map(|&(sx, sy, amp)| {
                let r2 = (px - sx).powi(2) + (py - sy).powi(2);
                amp * (-r2 * inv_two_sigma_sq).exp()
            })
            .sum();
        ((BACKGROUND as f64 + stars) * flux_scale) as f32
    })
}

fn detect_catalog(sky_info: &SkyInfo) -> SourceCatalog {
    let mut catalog = SourceCatalog::deblended();
    for (i, &(x, y, _)) in STARS.iter().enumerate() {
        let centroid = DVec2::new(x, y);
        let coord = sky_info.wcs().pixel_to_sky(centroid);
        catalog.push(SourceRecord::new(i as u64 + 1, centroid, coord).with_n_child(0));
    }
    catalog
}

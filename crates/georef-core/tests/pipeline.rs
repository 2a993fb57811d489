use std::sync::Arc;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use georef_core::{
    rmse, AccuracyReport, BoundsStrategy, CancelToken, ControlPoint, Direction, GeoTransform,
    NormOrder, PointTable, PointwiseMethod, PolynomialModel, RasterImage, ResampleOutcome,
    ResampleParams, ResampleState, ResampleTask, Session, SessionBundle,
};
use nalgebra::Point2;

/// Map coordinates of a pixel under a mildly non-linear scanner distortion.
fn truth(x: f64, y: f64) -> (f64, f64) {
    let wobble = 3.0 * (x / 40.0).sin() * (y / 55.0).cos();
    (350_000.0 + 2.0 * x + 0.1 * y + wobble, 4_800_000.0 - 2.0 * y + 0.05 * x - wobble)
}

fn point(x: f64, y: f64) -> ControlPoint {
    let (mx, my) = truth(x, y);
    ControlPoint::new(x, y, mx, my)
}

fn grid_gcps() -> Vec<ControlPoint> {
    (0..7)
        .flat_map(|r| (0..7).map(move |c| point(20.0 * c as f64, 15.0 * r as f64)))
        .collect()
}

fn cell_center_icps() -> Vec<ControlPoint> {
    [(10.0, 7.5), (50.0, 37.5), (90.0, 52.5), (70.0, 82.5), (110.0, 22.5)]
        .iter()
        .map(|&(x, y)| point(x, y))
        .collect()
}

fn raster(width: usize, height: usize) -> RasterImage {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x * 7 + y * 3) % 256) as u8))
        .collect();
    RasterImage::new(width, height, 1, data).expect("raster")
}

#[test]
fn rmse_of_known_vectors() {
    let (a, b) = rmse(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0], &[1.0, 2.0, 5.0], &[0.0, 0.0, 0.0])
        .expect("rmse");
    assert_relative_eq!(a, (4.0_f64 / 3.0).sqrt(), max_relative = 1e-12);
    assert_relative_eq!(a, 1.1547, max_relative = 1e-4);
    assert_eq!(b, 0.0);
}

#[test]
fn evaluate_is_bit_identical_across_calls() {
    let gcps = grid_gcps();
    let model = PolynomialModel::fit(&gcps, 3).expect("fit");
    let icps = cell_center_icps();
    for direction in [Direction::Forward, Direction::Backward] {
        assert_eq!(model.evaluate(&icps, direction), model.evaluate(&icps, direction));
    }
}

#[test]
fn degree_zero_predicts_the_mean() {
    let gcps = grid_gcps();
    let model = PolynomialModel::fit(&gcps, 0).expect("fit");
    let mean_x = gcps.iter().map(|p| p.map.x).sum::<f64>() / gcps.len() as f64;
    let (xs, _) = model.evaluate(&cell_center_icps(), Direction::Backward);
    for v in xs {
        assert_relative_eq!(v, mean_x, max_relative = 1e-12);
    }
}

#[test]
fn pointwise_correction_beats_plain_affine_fit() {
    let session = {
        let mut s = Session::new(grid_gcps(), cell_center_icps());
        s.fit(1).expect("fit");
        s
    };
    let plain = session.assess().expect("assess");

    for method in [
        PointwiseMethod::Multiquadratic,
        PointwiseMethod::LocalDistanceWeighted {
            norm: NormOrder::L2,
        },
        PointwiseMethod::LocalDistanceWeighted {
            norm: NormOrder::Inf,
        },
    ] {
        let corrected = session.corrected(method).expect("corrected");
        let report =
            AccuracyReport::compute(&corrected, session.gcps().len(), session.icps()).expect("report");
        assert!(
            report.backward.total() < plain.backward.total(),
            "{method:?}: {} >= {}",
            report.backward.total(),
            plain.backward.total()
        );

        // Exact at the GCPs for both interpolators.
        let pixels: Vec<Point2<f64>> = session.gcps().iter().map(|p| p.pixel).collect();
        for (got, p) in corrected.to_map(&pixels).iter().zip(session.gcps()) {
            assert_abs_diff_eq!(got.x, p.map.x, epsilon = 1e-5);
            assert_abs_diff_eq!(got.y, p.map.y, epsilon = 1e-5);
        }
    }
}

#[test]
fn resample_is_deterministic() {
    let mut session = Session::new(grid_gcps(), cell_center_icps());
    let model = session.fit(2).expect("fit");
    let image = raster(121, 91);
    let params = ResampleParams {
        step: 2.0,
        chunk_rows: 7,
        bounds: BoundsStrategy::ImageCorners,
    };

    let run = || {
        let mut events = Vec::new();
        let out = georef_core::resample(
            &image.view(),
            &*model,
            session.gcps(),
            &params,
            &mut |p: f64| events.push(p),
            &|| false,
        )
        .expect("resample");
        (out, events)
    };
    let (a, ev_a) = run();
    let (b, ev_b) = run();
    assert_eq!(a, b);
    assert_eq!(ev_a, ev_b);

    let out = a.into_image().expect("completed");
    assert!(out.image.width > 50 && out.image.height > 40);
    assert!(out.image.data.iter().any(|&v| v != 0));
    assert_eq!(ev_a.len(), out.grid.rows.div_ceil(7));
}

#[test]
fn task_cancelled_before_first_chunk_is_clean() {
    let mut session = Session::new(grid_gcps(), cell_center_icps());
    session.fit(1).expect("fit");
    let job = session
        .resample_job(raster(121, 91), ResampleParams::with_step(1.0))
        .expect("job");

    let token = CancelToken::new();
    token.cancel();
    let mut task = ResampleTask::spawn_with_token(job, token);
    assert_eq!(task.progress().count(), 0);
    let outcome = task.result().expect("cancellation is not an error");
    assert_eq!(outcome, ResampleOutcome::Cancelled);
}

#[test]
fn background_resample_uses_the_snapshot() {
    let mut session = Session::new(grid_gcps(), cell_center_icps());
    session.fit(1).expect("fit");
    let params = ResampleParams {
        chunk_rows: 16,
        ..ResampleParams::with_step(2.0)
    };
    let job = session.resample_job(raster(121, 91), params.clone()).expect("job");
    let snapshot = Arc::clone(&job.transform);

    let mut task = ResampleTask::spawn(job);
    // Refit while the worker runs; the job keeps the degree-1 model.
    session.fit(3).expect("refit");
    let events: Vec<f64> = task.progress().collect();
    let state_before = task.state();
    let outcome = task.result().expect("resample");
    assert!(matches!(
        state_before,
        ResampleState::Running | ResampleState::Completed
    ));

    let expected = georef_core::resample(
        &raster(121, 91).view(),
        &*snapshot,
        session.gcps(),
        &params,
        &mut |_: f64| {},
        &|| false,
    )
    .expect("resample");
    assert_eq!(outcome, expected);
    assert_eq!(events.last().copied(), Some(100.0));
}

#[test]
fn table_to_session_bundle_round_trip() {
    let mut text = String::from("# id x y X Y Z icp\n");
    for (i, p) in grid_gcps().iter().chain(cell_center_icps().iter()).enumerate() {
        let icp = u8::from(i >= 49);
        text.push_str(&format!(
            "P{i} {} {} {} {} 100 {icp}\n",
            p.pixel.x, p.pixel.y, p.map.x, p.map.y
        ));
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let points_path = dir.path().join("points.txt");
    std::fs::write(&points_path, text).expect("write points");

    let table = PointTable::load(&points_path).expect("load");
    let mut session = Session::from_table(&table);
    assert_eq!(session.gcps().len(), 49);
    assert_eq!(session.icps().len(), 5);
    session.fit(2).expect("fit");

    let bundle_path = dir.path().join("session.json");
    session
        .bundle()
        .expect("bundle")
        .write_json(&bundle_path)
        .expect("write bundle");

    let mut restored = Session::from_table(&table);
    restored
        .restore(SessionBundle::load_json(&bundle_path).expect("load bundle"))
        .expect("restore");
    assert_eq!(
        restored.assess().expect("assess"),
        session.assess().expect("assess")
    );
}

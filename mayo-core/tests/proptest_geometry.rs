//! Property-based tests for the numeric kernels using proptest.

use ndarray::Array2;
use proptest::prelude::*;

use mayo_core::change::Change;
use mayo_core::geometry::{average_precision, box_to_corners, corners_to_box, iou, iou_array};
use mayo_core::session::IterationPlan;

fn boxes(max_rows: usize) -> impl Strategy<Value = Array2<f64>> {
    prop::collection::vec(
        (-100.0..100.0f64, -100.0..100.0f64, 0.0..50.0f64, 0.0..50.0f64),
        1..max_rows,
    )
    .prop_map(|rows| {
        let n = rows.len();
        let flat: Vec<f64> = rows
            .into_iter()
            .flat_map(|(x, y, w, h)| [x, y, w, h])
            .collect();
        Array2::from_shape_vec((n, 4), flat).unwrap()
    })
}

// --- Iteration plan properties ---

proptest! {
    #[test]
    fn plan_counts_sum_to_examples(num_examples in 0usize..10_000, batch_size in 1usize..512) {
        let plan = IterationPlan::new(num_examples, batch_size).unwrap();
        let total: usize = (0..plan.num_iterations).map(|s| plan.examples_in(s)).sum();
        prop_assert_eq!(total, num_examples);
        if plan.num_iterations > 0 {
            let remainder = num_examples % batch_size;
            let expected = if remainder == 0 { batch_size } else { remainder };
            prop_assert_eq!(plan.examples_in(plan.num_iterations - 1), expected);
        }
    }
}

// --- Geometry properties ---

proptest! {
    #[test]
    fn corners_round_trip(b in boxes(16)) {
        let back = corners_to_box(&box_to_corners(&b).unwrap()).unwrap();
        for (x, y) in back.iter().zip(b.iter()) {
            prop_assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn iou_with_self_is_one(b in boxes(16)) {
        let b = b.mapv(|v| v.abs() + 0.01);
        let result = iou(&b, &b, false).unwrap();
        for v in result.iter() {
            prop_assert!((v - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn iou_is_bounded(a in boxes(8), b in boxes(8)) {
        let a = a.mapv(|v| v.abs() + 0.01);
        let b = b.mapv(|v| v.abs() + 0.01);
        let result = iou_array(&a, &b).unwrap();
        prop_assert_eq!(result.iou.shape(), &[a.nrows(), b.nrows()]);
        for (v, u) in result.iou.iter().zip(result.union.iter()) {
            prop_assert!(*v >= 0.0);
            prop_assert!(*u >= f64::EPSILON);
        }
    }

    #[test]
    fn average_precision_within_unit_interval(
        curve in prop::collection::vec((0.0..=1.0f64, 0.0..=1.0f64), 0..32)
    ) {
        let mut curve = curve;
        curve.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (recall, precision): (Vec<f64>, Vec<f64>) = curve.into_iter().unzip();
        let ap = average_precision(&recall, &precision).unwrap();
        prop_assert!((0.0..=1.0 + 1e-12).contains(&ap));
    }
}

// --- Change tracking properties ---

proptest! {
    #[test]
    fn delta_reports_difference(a in -1e6..1e6f64, b in -1e6..1e6f64) {
        let mut change = Change::new();
        prop_assert_eq!(change.delta("k", a), 0.0);
        prop_assert_eq!(change.delta("k", b), b - a);
    }

    #[test]
    fn moving_average_stays_within_sample_range(
        samples in prop::collection::vec(0.0..1000.0f64, 1..64),
        window in 1usize..200,
    ) {
        let mut change = Change::new();
        let mut last = 0.0;
        for s in &samples {
            last = change.moving_metrics("rate", *s, false, window).mean;
        }
        let lo = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(last >= lo - 1e-9 && last <= hi + 1e-9);
    }
}

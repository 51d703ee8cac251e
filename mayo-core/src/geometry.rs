//! Bounding-box geometry for detection models.
//!
//! Boxes are stored along the last axis of an `ndarray` array either as
//! `(x, y, w, h)` with `(x, y)` the box center, or as corners
//! `(y_min, x_min, y_max, x_max)`. Anchors are `(w, h)` pairs centered at the
//! origin.

use ndarray::{Array2, ArrayBase, ArrayD, ArrayViewD, Axis, Data, Dimension, Ix2, IxDyn, Zip};

use crate::error::MayoError;

/// Convert `(x, y, w, h)` boxes to `(y_min, x_min, y_max, x_max)` corners.
pub fn box_to_corners<S, D>(boxes: &ArrayBase<S, D>) -> Result<ArrayD<f64>, MayoError>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let boxes = boxes.view().into_dyn();
    expect_last_dim(&boxes, 4, "boxes")?;
    stack_last(&box_corners(&boxes))
}

/// Convert `(y_min, x_min, y_max, x_max)` corners back to `(x, y, w, h)`.
pub fn corners_to_box<S, D>(corners: &ArrayBase<S, D>) -> Result<ArrayD<f64>, MayoError>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let corners = corners.view().into_dyn();
    expect_last_dim(&corners, 4, "corners")?;
    let axis = Axis(corners.ndim() - 1);
    let y_min = corners.index_axis(axis, 0);
    let x_min = corners.index_axis(axis, 1);
    let y_max = corners.index_axis(axis, 2);
    let x_max = corners.index_axis(axis, 3);
    let y = (&y_min + &y_max) / 2.0;
    let x = (&x_min + &x_max) / 2.0;
    let h = &y_max - &y_min;
    let w = &x_max - &x_min;
    stack_last(&[x, y, w, h])
}

/// Area spanned by corner coordinates, elementwise.
pub fn area(
    y_min: &ArrayD<f64>,
    x_min: &ArrayD<f64>,
    y_max: &ArrayD<f64>,
    x_max: &ArrayD<f64>,
) -> ArrayD<f64> {
    (y_max - y_min) * (x_max - x_min)
}

/// Pair every leading index of `a` with every leading index of `b`.
///
/// For shapes `[A..., D]` and `[B..., D]` both results have shape
/// `[A..., B..., D]`; element `[i..., j..., :]` of the first is `a[i..., :]`
/// and of the second is `b[j..., :]`.
pub fn cartesian<S1, D1, S2, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<(ArrayD<f64>, ArrayD<f64>), MayoError>
where
    S1: Data<Elem = f64>,
    D1: Dimension,
    S2: Data<Elem = f64>,
    D2: Dimension,
{
    let a = a.view().into_dyn();
    let b = b.view().into_dyn();
    let (Some((&last_a, lead_a)), Some((&last_b, lead_b))) =
        (a.shape().split_last(), b.shape().split_last())
    else {
        return Err(MayoError::shape_mismatch(
            "cartesian operands need at least one dimension",
        ));
    };
    if last_a != last_b {
        return Err(MayoError::shape_mismatch(format!(
            "the last dimension of both operands should match, got {last_a} and {last_b}"
        )));
    }

    let mut target = lead_a.to_vec();
    target.extend_from_slice(lead_b);
    target.push(last_a);

    let mut shape_a = lead_a.to_vec();
    shape_a.extend(std::iter::repeat_n(1, lead_b.len()));
    shape_a.push(last_a);

    let mut shape_b = vec![1; lead_a.len()];
    shape_b.extend_from_slice(lead_b);
    shape_b.push(last_b);

    let tiled_a = expand(&a, shape_a, &target)?;
    let tiled_b = expand(&b, shape_b, &target)?;
    Ok((tiled_a, tiled_b))
}

/// Intersection over union for every broadcast pair of boxes.
///
/// Boxes are `(x, y, w, h)`; with `anchors` they are `(w, h)` centered at the
/// origin. The operands are broadcast with numpy rules and the result has the
/// broadcast shape minus the last axis. There is no guard on the union: two
/// empty boxes give `NaN`.
pub fn iou<S1, D1, S2, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
    anchors: bool,
) -> Result<ArrayD<f64>, MayoError>
where
    S1: Data<Elem = f64>,
    D1: Dimension,
    S2: Data<Elem = f64>,
    D2: Dimension,
{
    let expected = if anchors { 2 } else { 4 };
    let a = a.view().into_dyn();
    let b = b.view().into_dyn();
    expect_last_dim(&a, expected, "boxes")?;
    expect_last_dim(&b, expected, "boxes")?;

    let shape = broadcast_shape(a.shape(), b.shape())?;
    let a = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| cannot_broadcast(a.shape(), &shape))?;
    let b = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| cannot_broadcast(b.shape(), &shape))?;

    let [y1_min, x1_min, y1_max, x1_max] = if anchors {
        anchor_corners(&a)
    } else {
        box_corners(&a)
    };
    let [y2_min, x2_min, y2_max, x2_max] = if anchors {
        anchor_corners(&b)
    } else {
        box_corners(&b)
    };

    let yi_min = zip_with(&y1_min, &y2_min, f64::max);
    let xi_min = zip_with(&x1_min, &x2_min, f64::max);
    let yi_max = zip_with(&y1_max, &y2_max, f64::min);
    let xi_max = zip_with(&x1_max, &x2_max, f64::min);

    // Disjoint boxes overlap by zero, not by a negative extent.
    let intersect_h = (&yi_max - &yi_min).mapv(|v| v.max(0.0));
    let intersect_w = (&xi_max - &xi_min).mapv(|v| v.max(0.0));
    let intersection = intersect_h * intersect_w;

    let area1 = area(&y1_min, &x1_min, &y1_max, &x1_max);
    let area2 = area(&y2_min, &x2_min, &y2_max, &x2_max);
    let union = area1 + area2 - &intersection;
    Ok(intersection / union)
}

/// Dense pairwise IOU and its intermediate terms, all `[N, K]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IouArray {
    pub iou: Array2<f64>,
    pub intersect_width: Array2<f64>,
    pub intersect_height: Array2<f64>,
    pub intersection: Array2<f64>,
    pub union: Array2<f64>,
}

/// Pairwise IOU between `a[N, 4]` and `b[K, 4]`, both `(x, y, w, h)`.
///
/// Overlap is measured from whichever box lies further right on the x axis.
/// The height term is keyed off the same x comparison rather than a y
/// comparison; existing result files were produced this way, so it stays.
/// The union is floored at `f64::EPSILON`.
pub fn iou_array<S1, S2>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Result<IouArray, MayoError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    if a.ncols() != 4 || b.ncols() != 4 {
        return Err(MayoError::shape_mismatch(format!(
            "iou_array expects [N, 4] and [K, 4], got {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }

    let shape = (a.nrows(), b.nrows());
    let mut iou = Array2::zeros(shape);
    let mut intersect_width = Array2::zeros(shape);
    let mut intersect_height = Array2::zeros(shape);
    let mut intersection = Array2::zeros(shape);
    let mut union = Array2::zeros(shape);

    for (i, ra) in a.outer_iter().enumerate() {
        let (ax, ay, aw, ah) = (ra[0], ra[1], ra[2], ra[3]);
        for (k, rb) in b.outer_iter().enumerate() {
            let (bx, by, bw, bh) = (rb[0], rb[1], rb[2], rb[3]);
            let (iw, ih) = if ax >= bx {
                (
                    (bx + bw / 2.0) - (ax - aw / 2.0),
                    (by + bh / 2.0) - (ay - ah / 2.0),
                )
            } else {
                (
                    (ax + aw / 2.0) - (bx - bw / 2.0),
                    (ay + ah / 2.0) - (by - bh / 2.0),
                )
            };
            let iw = iw.max(0.0);
            let ih = ih.max(0.0);
            let inter = iw * ih;
            let ua = (ah * aw + bh * bw - inter).max(f64::EPSILON);

            iou[[i, k]] = inter / ua;
            intersect_width[[i, k]] = iw;
            intersect_height[[i, k]] = ih;
            intersection[[i, k]] = inter;
            union[[i, k]] = ua;
        }
    }

    Ok(IouArray {
        iou,
        intersect_width,
        intersect_height,
        intersection,
        union,
    })
}

/// Average precision under the interpolated precision/recall curve.
///
/// Recall is padded with 0 and 1, precision with 0 at both ends. Precision is
/// replaced by its running maximum from the right, then `Δrecall * precision`
/// is summed over every point where recall changes.
pub fn average_precision(recall: &[f64], precision: &[f64]) -> Result<f64, MayoError> {
    if recall.len() != precision.len() {
        return Err(MayoError::shape_mismatch(format!(
            "recall and precision curves differ in length: {} vs {}",
            recall.len(),
            precision.len()
        )));
    }

    let mut mrec = Vec::with_capacity(recall.len() + 2);
    mrec.push(0.0);
    mrec.extend_from_slice(recall);
    mrec.push(1.0);

    let mut mpre = Vec::with_capacity(precision.len() + 2);
    mpre.push(0.0);
    mpre.extend_from_slice(precision);
    mpre.push(0.0);

    for i in (1..mpre.len()).rev() {
        mpre[i - 1] = mpre[i - 1].max(mpre[i]);
    }

    Ok(mrec
        .windows(2)
        .enumerate()
        .filter(|(_, r)| r[1] != r[0])
        .map(|(i, r)| (r[1] - r[0]) * mpre[i + 1])
        .sum())
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, MayoError> {
    let ndim = a.len().max(b.len());
    let mut shape = vec![0; ndim];
    for (i, slot) in shape.iter_mut().enumerate() {
        let da = dim_from_right(a, ndim - 1 - i);
        let db = dim_from_right(b, ndim - 1 - i);
        *slot = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(MayoError::shape_mismatch(format!(
                    "shapes {a:?} and {b:?} cannot be broadcast together"
                )));
            }
        };
    }
    Ok(shape)
}

fn dim_from_right(shape: &[usize], offset: usize) -> usize {
    if offset < shape.len() {
        shape[shape.len() - 1 - offset]
    } else {
        1
    }
}

fn expect_last_dim(
    array: &ArrayViewD<'_, f64>,
    expected: usize,
    what: &str,
) -> Result<(), MayoError> {
    match array.shape().last() {
        Some(&last) if last == expected => Ok(()),
        Some(&last) => Err(MayoError::shape_mismatch(format!(
            "the number of values representing {what} should be {expected}, got {last}"
        ))),
        None => Err(MayoError::shape_mismatch(format!(
            "{what} need a trailing dimension of size {expected}"
        ))),
    }
}

fn cannot_broadcast(from: &[usize], to: &[usize]) -> MayoError {
    MayoError::shape_mismatch(format!("cannot broadcast {from:?} to {to:?}"))
}

/// Corners of `(x, y, w, h)` boxes, unstacked.
fn box_corners(boxes: &ArrayViewD<'_, f64>) -> [ArrayD<f64>; 4] {
    let axis = Axis(boxes.ndim() - 1);
    let x = boxes.index_axis(axis, 0);
    let y = boxes.index_axis(axis, 1);
    let w_half = &boxes.index_axis(axis, 2) / 2.0;
    let h_half = &boxes.index_axis(axis, 3) / 2.0;
    [&y - &h_half, &x - &w_half, &y + &h_half, &x + &w_half]
}

/// Corners of `(w, h)` anchors centered at the origin, unstacked.
fn anchor_corners(anchors: &ArrayViewD<'_, f64>) -> [ArrayD<f64>; 4] {
    let axis = Axis(anchors.ndim() - 1);
    let x_max = &anchors.index_axis(axis, 0) / 2.0;
    let y_max = &anchors.index_axis(axis, 1) / 2.0;
    [y_max.mapv(|v| -v), x_max.mapv(|v| -v), y_max, x_max]
}

fn zip_with(a: &ArrayD<f64>, b: &ArrayD<f64>, f: fn(f64, f64) -> f64) -> ArrayD<f64> {
    Zip::from(a).and(b).map_collect(|&x, &y| f(x, y))
}

fn stack_last(parts: &[ArrayD<f64>]) -> Result<ArrayD<f64>, MayoError> {
    let axis = Axis(parts.first().map_or(0, |p| p.ndim()));
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    ndarray::stack(axis, &views).map_err(|e| MayoError::shape_mismatch(e.to_string()))
}

fn expand(
    array: &ArrayViewD<'_, f64>,
    shape: Vec<usize>,
    target: &[usize],
) -> Result<ArrayD<f64>, MayoError> {
    let reshaped = array
        .to_owned()
        .into_shape_with_order(IxDyn(&shape))
        .map_err(|e| MayoError::shape_mismatch(e.to_string()))?;
    let tiled = reshaped
        .broadcast(IxDyn(target))
        .ok_or_else(|| cannot_broadcast(&shape, target))?
        .to_owned();
    Ok(tiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_box_to_corners() {
        let boxes = array![[2.0, 3.0, 4.0, 2.0]];
        let corners = box_to_corners(&boxes).unwrap();
        assert_eq!(corners.shape(), &[1, 4]);
        assert_eq!(corners.as_slice().unwrap(), &[2.0, 0.0, 4.0, 4.0]);
    }

    #[test]
    fn test_corners_round_trip() {
        let boxes = array![[[0.5, 0.5, 1.0, 1.0], [10.0, -3.0, 0.0, 6.0]]];
        let back = corners_to_box(&box_to_corners(&boxes).unwrap()).unwrap();
        assert_eq!(back.shape(), boxes.shape());
        for (a, b) in back.iter().zip(boxes.iter()) {
            assert!(close(*a, *b));
        }
    }

    #[test]
    fn test_box_to_corners_wrong_width() {
        let boxes = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            box_to_corners(&boxes),
            Err(MayoError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_area() {
        let y_min = array![0.0].into_dyn();
        let x_min = array![1.0].into_dyn();
        let y_max = array![2.0].into_dyn();
        let x_max = array![4.0].into_dyn();
        assert_eq!(area(&y_min, &x_min, &y_max, &x_max)[[0]], 6.0);
    }

    #[test]
    fn test_cartesian_pairs_every_row() {
        let a = array![[1.0, 1.0], [2.0, 2.0]];
        let b = array![[10.0, 10.0], [20.0, 20.0], [30.0, 30.0]];
        let (ta, tb) = cartesian(&a, &b).unwrap();
        assert_eq!(ta.shape(), &[2, 3, 2]);
        assert_eq!(tb.shape(), &[2, 3, 2]);
        assert_eq!(ta[[1, 2, 0]], 2.0);
        assert_eq!(tb[[1, 2, 0]], 30.0);
        assert_eq!(tb[[0, 1, 1]], 20.0);
    }

    #[test]
    fn test_cartesian_trailing_mismatch() {
        let a = array![[1.0, 1.0]];
        let b = array![[1.0, 1.0, 1.0]];
        assert!(matches!(
            cartesian(&a, &b),
            Err(MayoError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_iou_self_is_one() {
        let boxes = array![[0.0, 0.0, 2.0, 2.0], [5.0, 1.0, 0.5, 3.0]];
        let result = iou(&boxes, &boxes, false).unwrap();
        assert_eq!(result.shape(), &[2]);
        assert!(result.iter().all(|v| close(*v, 1.0)));
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = array![0.0, 0.0, 1.0, 1.0];
        let b = array![5.0, 5.0, 1.0, 1.0];
        let result = iou(&a, &b, false).unwrap();
        assert_eq!(result.ndim(), 0);
        assert_eq!(result.into_iter().next(), Some(0.0));
    }

    #[test]
    fn test_iou_half_overlap() {
        // Two 2x2 boxes offset by 1 along x: intersection 2, union 6.
        let a = array![[0.0, 0.0, 2.0, 2.0]];
        let b = array![[1.0, 0.0, 2.0, 2.0]];
        let result = iou(&a, &b, false).unwrap();
        assert!(close(result[[0]], 2.0 / 6.0));
    }

    #[test]
    fn test_iou_broadcasts_with_cartesian() {
        let a = array![[0.0, 0.0, 2.0, 2.0], [10.0, 10.0, 2.0, 2.0]];
        let b = array![[0.0, 0.0, 2.0, 2.0]];
        let (pa, pb) = cartesian(&a, &b).unwrap();
        let result = iou(&pa, &pb, false).unwrap();
        assert_eq!(result.shape(), &[2, 1]);
        assert!(close(result[[0, 0]], 1.0));
        assert!(close(result[[1, 0]], 0.0));

        // Plain broadcasting of [2, 1, 4] against [1, 4].
        let a3 = a.into_shape_with_order((2, 1, 4)).unwrap();
        let result = iou(&a3, &b, false).unwrap();
        assert_eq!(result.shape(), &[2, 1]);
    }

    #[test]
    fn test_iou_anchors() {
        let a = array![[2.0, 2.0]];
        let b = array![[1.0, 1.0]];
        let result = iou(&a, &b, true).unwrap();
        assert!(close(result[[0]], 0.25));
    }

    #[test]
    fn test_iou_rejects_wrong_box_size() {
        let a = array![[2.0, 2.0]];
        assert!(matches!(
            iou(&a, &a, false),
            Err(MayoError::ShapeMismatch(_))
        ));
        let b = array![[0.0, 0.0, 1.0, 1.0]];
        assert!(matches!(iou(&b, &b, true), Err(MayoError::ShapeMismatch(_))));
    }

    #[test]
    fn test_iou_rejects_unbroadcastable_shapes() {
        let a = Array::<f64, _>::zeros((3, 4));
        let b = Array::<f64, _>::zeros((2, 4));
        assert!(matches!(iou(&a, &b, false), Err(MayoError::ShapeMismatch(_))));
    }

    #[test]
    fn test_iou_zero_union_is_nan() {
        let a = array![[0.0, 0.0, 0.0, 0.0]];
        let result = iou(&a, &a, false).unwrap();
        assert!(result[[0]].is_nan());
    }

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape(&[2, 1, 4], &[3, 4]).unwrap(), vec![2, 3, 4]);
        assert_eq!(broadcast_shape(&[4], &[5, 4]).unwrap(), vec![5, 4]);
        assert!(broadcast_shape(&[2, 4], &[3, 4]).is_err());
    }

    #[test]
    fn test_iou_array_identical_boxes() {
        let a = array![[1.0, 1.0, 2.0, 2.0], [4.0, 4.0, 1.0, 3.0]];
        let result = iou_array(&a, &a).unwrap();
        assert_eq!(result.iou.shape(), &[2, 2]);
        assert!(close(result.iou[[0, 0]], 1.0));
        assert!(close(result.iou[[1, 1]], 1.0));
        assert!(close(result.intersection[[0, 0]], 4.0));
        assert!(close(result.union[[1, 1]], 3.0));
    }

    #[test]
    fn test_iou_array_disjoint_and_epsilon_union() {
        let a = array![[0.0, 0.0, 1.0, 1.0]];
        let b = array![[10.0, 0.0, 1.0, 1.0]];
        let result = iou_array(&a, &b).unwrap();
        assert_eq!(result.intersect_width[[0, 0]], 0.0);
        assert_eq!(result.iou[[0, 0]], 0.0);

        let empty = array![[0.0, 0.0, 0.0, 0.0]];
        let result = iou_array(&empty, &empty).unwrap();
        assert_eq!(result.union[[0, 0]], f64::EPSILON);
        assert_eq!(result.iou[[0, 0]], 0.0);
    }

    #[test]
    fn test_iou_array_height_keyed_on_x() {
        // a is right of b, so the height term is b.top - a.bottom even though
        // a sits above b: (0 + 0.5) - (5 - 0.5) < 0, clamped to zero.
        let a = array![[1.0, 5.0, 2.0, 1.0]];
        let b = array![[0.0, 0.0, 2.0, 1.0]];
        let result = iou_array(&a, &b).unwrap();
        assert!(close(result.intersect_width[[0, 0]], 1.0));
        assert_eq!(result.intersect_height[[0, 0]], 0.0);

        // Swap the vertical order: the same branch now reports 6 units of
        // height overlap for two boxes that are each 1 unit tall.
        let a = array![[1.0, 0.0, 2.0, 1.0]];
        let b = array![[0.0, 5.0, 2.0, 1.0]];
        let result = iou_array(&a, &b).unwrap();
        assert!(close(result.intersect_height[[0, 0]], 6.0));
    }

    #[test]
    fn test_iou_array_rejects_bad_width() {
        let a = array![[0.0, 0.0, 1.0]];
        let b = array![[0.0, 0.0, 1.0, 1.0]];
        assert!(matches!(
            iou_array(&a, &b),
            Err(MayoError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_average_precision_perfect() {
        assert!(close(average_precision(&[0.0, 1.0], &[1.0, 1.0]).unwrap(), 1.0));
    }

    #[test]
    fn test_average_precision_empty() {
        assert_eq!(average_precision(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_average_precision_half() {
        // Padded recall [0, .5, 1, 1], envelope [.5, .5, .5, 0].
        let ap = average_precision(&[0.5, 1.0], &[0.5, 0.5]).unwrap();
        assert!(close(ap, 0.5));
    }

    #[test]
    fn test_average_precision_envelope() {
        // The dip to 0.4 at recall 0.5 is lifted to the later 0.8.
        let ap = average_precision(&[0.25, 0.5, 0.75], &[1.0, 0.4, 0.8]).unwrap();
        assert!(close(ap, 0.25 * 1.0 + 0.25 * 0.8 + 0.25 * 0.8));
    }

    #[test]
    fn test_average_precision_length_mismatch() {
        assert!(matches!(
            average_precision(&[0.5], &[]),
            Err(MayoError::ShapeMismatch(_))
        ));
    }
}

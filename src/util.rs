use float_ord::FloatOrd;
use geo::{Area, BoundingRect, Coord, LineString, MultiPoint, Polygon};

/// A detection quadrilateral as `[x, y]` pairs in image pixel space.
pub type Quad = Vec<[f32; 2]>;

/// Axis-aligned statistics of a box. Rotation of the quadrilateral itself is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStats {
    pub center: Coord<f32>,
    pub min: Coord<f32>,
    pub max: Coord<f32>,
    pub width: f32,
    pub height: f32,
}

pub(crate) fn to_geo_poly(points: &[[f32; 2]]) -> Polygon<f32> {
    let points = points.iter().map(|&[x, y]| Coord { x, y }).collect();
    Polygon::new(LineString::new(points), vec![])
}

/// Area of a box, never negative.
///
/// Boxes with fewer than 3 points are degenerate and have no area. Engines sometimes
/// return the corners in axis order instead of winding order, which makes the polygon
/// self-intersect and cancel out to zero, so a zero polygon area falls back to the area
/// of the bounding rectangle.
pub fn polygon_area(points: &[[f32; 2]]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let area = to_geo_poly(points).unsigned_area();
    if area != 0.0 {
        return area;
    }
    to_geo_poly(points)
        .bounding_rect()
        .map(|rect| rect.width() * rect.height())
        .unwrap_or(0.0)
}

pub fn box_stats(points: &[[f32; 2]]) -> BoxStats {
    let Some(&[x0, y0]) = points.first() else {
        return BoxStats {
            center: Coord::zero(),
            min: Coord::zero(),
            max: Coord::zero(),
            width: 0.0,
            height: 0.0,
        };
    };
    let mut min = Coord { x: x0, y: y0 };
    let mut max = min;
    let mut sum = Coord::zero();
    for &[x, y] in points {
        min.x = min.x.min(x);
        min.y = min.y.min(y);
        max.x = max.x.max(x);
        max.y = max.y.max(y);
        sum = sum + Coord { x, y };
    }
    BoxStats {
        center: sum / points.len() as f32,
        min,
        max,
        width: max.x - min.x,
        height: max.y - min.y,
    }
}

/// Axis-aligned envelope of every point, as four corners clockwise from the top left.
pub fn envelope<'a>(boxes: impl IntoIterator<Item = &'a [[f32; 2]]>) -> [[f32; 2]; 4] {
    let points = boxes
        .into_iter()
        .flatten()
        .map(|&[x, y]| Coord { x, y })
        .collect::<Vec<_>>();
    match MultiPoint::from(points).bounding_rect() {
        Some(rect) => {
            let (min, max) = (rect.min(), rect.max());
            [[min.x, min.y], [max.x, min.y], [max.x, max.y], [min.x, max.y]]
        }
        None => [[0.0; 2]; 4],
    }
}

fn sorted(values: &[f32]) -> Vec<f32> {
    let mut values = values.to_vec();
    values.sort_by_key(|it| FloatOrd(*it));
    values
}

/// Median, averaging the two middle values for even lengths. Empty input yields 0.
pub fn median(values: &[f32]) -> f32 {
    quantile(values, 0.5)
}

/// Quantile with linear interpolation between the closest ranks. Empty input yields 0.
pub fn quantile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let values = sorted(values);
    let rank = q.clamp(0.0, 1.0) * (values.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f32;
    values[lower] + (values[upper] - values[lower]) * fraction
}

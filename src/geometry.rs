use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::Serialize;

/// Four corners of a sheet, always stored in canonical order.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Quadrilateral {
    pub top_left: (f32, f32),
    pub top_right: (f32, f32),
    pub bottom_left: (f32, f32),
    pub bottom_right: (f32, f32),
}

impl Quadrilateral {
    /// Builds a quadrilateral from four corners in any order. The corner with
    /// the smallest `x + y` is top-left and the largest is bottom-right; of
    /// the remaining two, the smallest `y - x` is top-right.
    pub fn from_unordered(points: [Point<f32>; 4]) -> Self {
        let by_sum = |p: &&Point<f32>| p.x + p.y;
        let by_diff = |p: &&Point<f32>| p.y - p.x;

        let top_left = points.iter().min_by(|a, b| by_sum(a).total_cmp(&by_sum(b)));
        let bottom_right = points.iter().max_by(|a, b| by_sum(a).total_cmp(&by_sum(b)));
        let top_right = points.iter().min_by(|a, b| by_diff(a).total_cmp(&by_diff(b)));
        let bottom_left = points.iter().max_by(|a, b| by_diff(a).total_cmp(&by_diff(b)));

        // the iterators are over a non-empty array, so every corner exists
        let corner = |p: Option<&Point<f32>>| p.map_or((0.0, 0.0), |p| (p.x, p.y));
        Self {
            top_left: corner(top_left),
            top_right: corner(top_right),
            bottom_left: corner(bottom_left),
            bottom_right: corner(bottom_right),
        }
    }

    /// A quadrilateral covering a whole `width` x `height` image.
    pub fn full_frame(width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            top_left: (0.0, 0.0),
            top_right: (w, 0.0),
            bottom_left: (0.0, h),
            bottom_right: (w, h),
        }
    }

    pub fn corners(&self) -> [(f32, f32); 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    pub fn area(&self) -> f32 {
        // walk the outline, not the canonical order
        let outline = [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
        .map(|(x, y)| Point::new(x, y));
        polygon_area(&outline)
    }
}

/// Area enclosed by a closed polygon (shoelace formula).
pub fn polygon_area<T>(points: &[Point<T>]) -> f32
where
    T: Copy + Into<f64>,
{
    if points.len() < 3 {
        return 0.0;
    }

    let twice_area: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| {
            let (ax, ay): (f64, f64) = (a.x.into(), a.y.into());
            let (bx, by): (f64, f64) = (b.x.into(), b.y.into());
            ax * by - bx * ay
        })
        .sum();

    (twice_area.abs() / 2.0) as f32
}

/// Smallest rect containing every point.
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

pub fn center_of_rect(rect: &Rect) -> Point<f32> {
    Point::new(
        rect.left() as f32 + rect.width() as f32 / 2.0,
        rect.top() as f32 + rect.height() as f32 / 2.0,
    )
}

/// Shrinks a rect by `fraction` of its size on every side. Returns the rect
/// unchanged when shrinking would leave nothing.
pub fn inset_rect(rect: &Rect, fraction: f32) -> Rect {
    let dx = (rect.width() as f32 * fraction).floor() as u32;
    let dy = (rect.height() as f32 * fraction).floor() as u32;
    if rect.width() <= dx * 2 || rect.height() <= dy * 2 {
        return *rect;
    }
    Rect::at(rect.left() + dx as i32, rect.top() + dy as i32)
        .of_size(rect.width() - dx * 2, rect.height() - dy * 2)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_quadrilateral_corner_order() {
        let quad = Quadrilateral::from_unordered([
            Point::new(510.0, 640.0),
            Point::new(95.0, 160.0),
            Point::new(90.0, 655.0),
            Point::new(505.0, 150.0),
        ]);
        assert_eq!(quad.top_left, (95.0, 160.0));
        assert_eq!(quad.top_right, (505.0, 150.0));
        assert_eq!(quad.bottom_left, (90.0, 655.0));
        assert_eq!(quad.bottom_right, (510.0, 640.0));
    }

    #[test]
    fn test_full_frame_area() {
        assert_eq!(Quadrilateral::full_frame(600, 800).area(), 480_000.0);
    }

    #[test]
    fn test_inset_rect() {
        let rect = Rect::at(10, 20).of_size(100, 50);
        let inset = inset_rect(&rect, 0.1);
        assert_eq!(inset, Rect::at(20, 25).of_size(80, 40));

        let tiny = Rect::at(0, 0).of_size(1, 1);
        assert_eq!(inset_rect(&tiny, 0.5), tiny);
    }

    #[test]
    fn test_bounding_rect() {
        let points = [Point::new(3, 4), Point::new(7, 2), Point::new(5, 9)];
        assert_eq!(bounding_rect(&points), Some(Rect::at(3, 2).of_size(5, 8)));
        assert_eq!(bounding_rect(&[]), None);
    }
}

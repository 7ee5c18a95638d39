use image::GrayImage;
use imageproc::{
    contours::{find_contours, BorderType},
    edges::canny,
    geometric_transformations::{warp_into, Interpolation, Projection},
    geometry::{approximate_polygon_dp, arc_length},
    point::Point,
};
use log::debug;
use logging_timer::time;

use crate::config::LocatorSettings;
use crate::geometry::{polygon_area, Quadrilateral};
use crate::image_utils::WHITE;
use crate::types::Size;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SheetError {
    #[error("no quadrilateral sheet boundary found")]
    NotFound,
    #[error("sheet corners {0:?} do not define a valid perspective transform")]
    DegenerateCorners(Quadrilateral),
}

/// A sheet warped to a canonical frontal view.
#[derive(Debug, Clone)]
pub struct RectifiedSheet {
    pub image: GrayImage,
    /// Where the sheet was found in the normalized image.
    pub corners: Quadrilateral,
}

/// Finds the sheet boundary as the largest contour that approximates to four
/// corners. Candidates are visited in contour discovery order and only a
/// strictly larger area replaces the current best, so the first of equally
/// sized candidates wins.
#[time]
pub fn find_sheet_quadrilateral(
    img: &GrayImage,
    settings: &LocatorSettings,
) -> Result<Quadrilateral, SheetError> {
    let edges = canny(img, settings.canny_low, settings.canny_high);
    let contours = find_contours::<i32>(&edges);
    let min_area = img.width() as f32 * img.height() as f32 * settings.min_area_fraction;

    let mut best: Option<(f32, [Point<f32>; 4])> = None;
    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    {
        let perimeter = arc_length(&contour.points, true);
        let epsilon = settings.approx_epsilon * perimeter;
        if contour.points.len() < 4 || epsilon <= 0.0 {
            continue;
        }
        let mut approx = approximate_polygon_dp(&contour.points, epsilon, true);
        // the closing point of the contour sits next to its starting point
        while approx.len() > 4 && closes_polygon(&approx, epsilon) {
            approx.pop();
        }
        if approx.len() != 4 {
            continue;
        }

        let area = polygon_area(&approx);
        if area < min_area {
            continue;
        }
        if best.as_ref().map_or(true, |(best_area, _)| area > *best_area) {
            let corners = [approx[0], approx[1], approx[2], approx[3]]
                .map(|p| Point::new(p.x as f32, p.y as f32));
            best = Some((area, corners));
        }
    }

    match best {
        Some((area, corners)) => {
            debug!("sheet boundary found with area {}", area);
            Ok(Quadrilateral::from_unordered(corners))
        }
        None => Err(SheetError::NotFound),
    }
}

fn closes_polygon(points: &[Point<i32>], epsilon: f64) -> bool {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => {
            let dx = (first.x - last.x) as f64;
            let dy = (first.y - last.y) as f64;
            (dx * dx + dy * dy).sqrt() <= epsilon
        }
        _ => false,
    }
}

/// Warps the region inside `corners` to a `size` image.
#[time]
pub fn rectify_sheet(
    img: &GrayImage,
    corners: &Quadrilateral,
    size: Size<u32>,
) -> Result<RectifiedSheet, SheetError> {
    let (w, h) = (size.width as f32, size.height as f32);
    let projection = Projection::from_control_points(
        corners.corners(),
        [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)],
    )
    .ok_or(SheetError::DegenerateCorners(*corners))?;

    debug!(
        "rectifying sheet of area {:.0} to {}x{}",
        corners.area(),
        size.width,
        size.height
    );

    let mut out = GrayImage::new(size.width, size.height);
    warp_into(img, &projection, Interpolation::Bilinear, WHITE, &mut out);
    Ok(RectifiedSheet {
        image: out,
        corners: *corners,
    })
}

use std::f32::consts::PI;

use image::{imageops, GrayImage};
use imageproc::{
    contours::{find_contours, BorderType},
    contrast::{otsu_level, threshold},
    geometry::arc_length,
    point::Point,
    rect::Rect,
};
use log::{debug, warn};
use logging_timer::time;

use crate::config::BubbleFilter;
use crate::geometry::{bounding_rect, center_of_rect, polygon_area};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BubbleError {
    #[error("found {found} bubbles, need at least {required}")]
    TooFewBubbles { found: usize, required: usize },
}

/// A printed answer bubble found on the sheet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bubble {
    pub bounds: Rect,
    pub center: Point<f32>,
}

/// Finds dark closed shapes on the sheet that look like answer bubbles,
/// either as printed outlines or as filled-in marks.
#[time]
pub fn find_bubbles(img: &GrayImage, filter: &BubbleFilter) -> Vec<Bubble> {
    // contours trace foreground (non-zero) pixels, so ink must be white
    let mut binary = threshold(img, otsu_level(img));
    imageops::invert(&mut binary);

    let contours = find_contours::<i32>(&binary);
    let bubbles = contours
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .filter_map(|contour| {
            let bounds = bounding_rect(&contour.points)?;
            if shape_could_be_bubble(filter, &contour.points, &bounds) {
                Some(Bubble {
                    bounds,
                    center: center_of_rect(&bounds),
                })
            } else {
                None
            }
        })
        .collect::<Vec<Bubble>>();

    debug!("found {} potential bubbles", bubbles.len());
    bubbles
}

/// Determines whether a contour could be a bubble based on its size and
/// roundness.
pub fn shape_could_be_bubble(filter: &BubbleFilter, points: &[Point<i32>], bounds: &Rect) -> bool {
    let (width, height) = (bounds.width(), bounds.height());
    if width < filter.min_size
        || height < filter.min_size
        || width > filter.max_size
        || height > filter.max_size
    {
        return false;
    }

    let aspect_ratio = width as f32 / height as f32;
    if aspect_ratio < filter.min_aspect_ratio || aspect_ratio > filter.max_aspect_ratio {
        return false;
    }

    let area = polygon_area(points);
    if area < filter.min_area || area > filter.max_area {
        return false;
    }

    let perimeter = arc_length(points, true) as f32;
    if perimeter <= 0.0 {
        return false;
    }
    let circularity = 4.0 * PI * area / (perimeter * perimeter);
    if circularity < filter.min_circularity {
        return false;
    }

    let extent = area / (width * height) as f32;
    extent >= filter.min_extent
}

/// Arranges bubbles into questions: rows top to bottom, each row cut into
/// groups of at most `choices` bubbles at unusually wide horizontal gaps.
/// Groups are numbered down each column of groups first, matching printed
/// multi-section sheets. Each bubble is paired with its choice index, taken
/// from its offset to the column's leftmost bubble, so a question missing a
/// bubble keeps the rest in their own slots.
pub fn group_bubbles_into_questions(
    bubbles: &[Bubble],
    sheet_height: u32,
    choices: usize,
    gap_factor: f32,
) -> Vec<Vec<(usize, Bubble)>> {
    let rows = group_bubbles_into_rows(bubbles, sheet_height);

    let mut groups: Vec<(usize, Vec<Bubble>)> = Vec::new();
    for (row_index, row) in rows.iter().enumerate() {
        for group in split_row_at_gaps(row, choices, gap_factor) {
            groups.push((row_index, group));
        }
    }

    let pitch = choice_pitch(&groups);
    let column_of = assign_group_columns(&groups, choices, pitch);
    let mut column_starts: Vec<f32> = Vec::new();
    for ((_, group), &column) in groups.iter().zip(&column_of) {
        if column_starts.len() <= column {
            column_starts.resize(column + 1, f32::INFINITY);
        }
        if let Some(first) = group.first() {
            column_starts[column] = column_starts[column].min(first.center.x);
        }
    }

    let mut ordered = groups
        .into_iter()
        .zip(column_of)
        .map(|((row, group), column)| (column, row, group))
        .collect::<Vec<_>>();
    ordered.sort_by_key(|(column, row, _)| (*column, *row));

    debug!("grouped bubbles into {} questions", ordered.len());
    ordered
        .into_iter()
        .map(|(column, _, group)| place_choices(&group, column_starts[column], pitch, choices))
        .collect()
}

/// Median distance between neighboring bubbles of the same question.
fn choice_pitch(groups: &[(usize, Vec<Bubble>)]) -> Option<f32> {
    let mut gaps = groups
        .iter()
        .flat_map(|(_, group)| group.windows(2).map(|w| w[1].center.x - w[0].center.x))
        .filter(|gap| *gap > 0.0)
        .collect::<Vec<f32>>();
    gaps.sort_by(|a, b| a.total_cmp(b));
    gaps.get(gaps.len() / 2).copied()
}

/// Pairs each bubble with the choice slot nearest its offset from
/// `column_start`. Bubbles outside the slots, or sharing a slot with a bubble
/// further left, are dropped.
fn place_choices(
    group: &[Bubble],
    column_start: f32,
    pitch: Option<f32>,
    choices: usize,
) -> Vec<(usize, Bubble)> {
    let Some(pitch) = pitch else {
        return group.iter().copied().enumerate().collect();
    };

    let mut placed: Vec<(usize, Bubble)> = Vec::with_capacity(group.len());
    for bubble in group {
        let slot = ((bubble.center.x - column_start) / pitch).round();
        if slot < 0.0 || slot >= choices as f32 {
            debug!("bubble at {:?} falls outside the choice slots", bubble.center);
            continue;
        }
        let slot = slot as usize;
        if placed.iter().any(|(choice, _)| *choice == slot) {
            debug!("bubble at {:?} repeats choice {}", bubble.center, slot);
            continue;
        }
        placed.push((slot, *bubble));
    }
    placed
}

/// Sorts bubbles into rows by vertical position. A bubble joins the current
/// row while its center is within the tolerance of the row's first bubble.
pub fn group_bubbles_into_rows(bubbles: &[Bubble], sheet_height: u32) -> Vec<Vec<Bubble>> {
    let tolerance = (sheet_height as f32 / 80.0).max(8.0);
    let mut sorted = bubbles.to_vec();
    sorted.sort_by(|a, b| a.center.y.total_cmp(&b.center.y));

    let mut rows: Vec<Vec<Bubble>> = Vec::new();
    let mut current: Vec<Bubble> = Vec::new();
    for bubble in sorted {
        let starts_new_row = current
            .first()
            .map_or(false, |first| (bubble.center.y - first.center.y).abs() > tolerance);
        if starts_new_row {
            rows.push(std::mem::take(&mut current));
        }
        current.push(bubble);
    }
    if !current.is_empty() {
        rows.push(current);
    }

    rows.retain(|row| row.len() >= 2);
    for row in rows.iter_mut() {
        row.sort_by(|a, b| a.center.x.total_cmp(&b.center.x));
    }
    rows
}

/// Splits a left-to-right row of bubbles into questions. Any gap wider than
/// `gap_factor` times the mean gap ends a question. Groups with fewer than
/// two bubbles are dropped; groups holding a whole multiple of `choices`
/// bubbles with no wide gap between them are cut evenly.
pub fn split_row_at_gaps(row: &[Bubble], choices: usize, gap_factor: f32) -> Vec<Vec<Bubble>> {
    if row.len() < 2 || choices == 0 {
        return Vec::new();
    }
    if row.len() <= choices {
        return vec![row.to_vec()];
    }

    let gaps = row
        .windows(2)
        .map(|w| w[1].center.x - w[0].center.x)
        .collect::<Vec<f32>>();
    let mean_gap = gaps.iter().sum::<f32>() / gaps.len() as f32;

    let mut groups = Vec::new();
    let mut start = 0;
    for (i, gap) in gaps.iter().enumerate() {
        if *gap > mean_gap * gap_factor {
            groups.push(&row[start..=i]);
            start = i + 1;
        }
    }
    groups.push(&row[start..]);

    let mut questions = Vec::new();
    for group in groups {
        if group.len() < 2 {
            continue;
        }
        if group.len() <= choices {
            warn_on_irregular_spacing(group);
            questions.push(group.to_vec());
        } else if group.len() % choices == 0 {
            for chunk in group.chunks(choices) {
                warn_on_irregular_spacing(chunk);
                questions.push(chunk.to_vec());
            }
        } else {
            debug!("dropping run of {} bubbles that does not split into questions", group.len());
        }
    }
    questions
}

/// Choices of one question should be evenly spaced; more than one gap off
/// the mean by half suggests the row was cut in the wrong place.
fn warn_on_irregular_spacing(question: &[Bubble]) {
    let gaps = question
        .windows(2)
        .map(|w| w[1].center.x - w[0].center.x)
        .collect::<Vec<f32>>();
    if gaps.is_empty() {
        return;
    }
    let mean_gap = gaps.iter().sum::<f32>() / gaps.len() as f32;
    let irregular = gaps
        .iter()
        .filter(|&&gap| (gap - mean_gap).abs() > mean_gap * 0.5)
        .count();
    if irregular > 1 {
        warn!("irregular bubble spacing detected, gaps: {:?}", gaps);
    }
}

/// Clusters groups into printed columns by the x position of their first
/// bubble. A new column starts whenever the next position jumps further than
/// a question missing its leading choices could be offset, and at least twice
/// the typical bubble width.
fn assign_group_columns(groups: &[(usize, Vec<Bubble>)], choices: usize, pitch: Option<f32>) -> Vec<usize> {
    let starts = groups
        .iter()
        .map(|(_, group)| group.first().map_or(0.0, |b| b.center.x))
        .collect::<Vec<f32>>();

    let mut widths = groups
        .iter()
        .flat_map(|(_, group)| group.iter().map(|b| b.bounds.width()))
        .collect::<Vec<u32>>();
    widths.sort_unstable();
    let typical_width = widths.get(widths.len() / 2).copied().unwrap_or(1) as f32;
    let max_offset = pitch.unwrap_or(0.0) * choices.saturating_sub(1).max(1) as f32;
    let column_jump = (typical_width * 2.0).max(max_offset);

    let mut order = (0..starts.len()).collect::<Vec<usize>>();
    order.sort_by(|a, b| starts[*a].total_cmp(&starts[*b]));

    let mut columns = vec![0; starts.len()];
    let mut column = 0;
    let mut previous: Option<f32> = None;
    for index in order {
        if let Some(previous) = previous {
            if starts[index] - previous > column_jump {
                column += 1;
            }
        }
        columns[index] = column;
        previous = Some(starts[index]);
    }
    columns
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::image_utils::{BLACK, WHITE};
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};

    fn bubble_at(x: f32, y: f32) -> Bubble {
        Bubble {
            bounds: Rect::at(x as i32 - 8, y as i32 - 8).of_size(17, 17),
            center: Point::new(x, y),
        }
    }

    #[test]
    fn test_find_bubbles_outlined_and_filled() {
        let mut img = GrayImage::from_pixel(200, 100, WHITE);
        draw_hollow_circle_mut(&mut img, (40, 50), 9, BLACK);
        draw_hollow_circle_mut(&mut img, (80, 50), 9, BLACK);
        draw_filled_circle_mut(&mut img, (120, 50), 9, BLACK);
        // too small and too elongated to be bubbles
        draw_filled_circle_mut(&mut img, (160, 20), 1, BLACK);
        imageproc::drawing::draw_filled_rect_mut(&mut img, Rect::at(140, 80).of_size(50, 4), BLACK);

        let bubbles = find_bubbles(&img, &BubbleFilter::default());
        let mut xs = bubbles.iter().map(|b| b.center.x.round() as i32).collect::<Vec<_>>();
        xs.sort_unstable();
        assert_eq!(xs.len(), 3, "{:?}", bubbles);
        assert!((xs[0] - 40).abs() <= 1);
        assert!((xs[1] - 80).abs() <= 1);
        assert!((xs[2] - 120).abs() <= 1);
    }

    #[test]
    fn test_rows_use_vertical_tolerance() {
        let bubbles = vec![
            bubble_at(70.0, 103.0),
            bubble_at(10.0, 100.0),
            bubble_at(40.0, 98.0),
            bubble_at(10.0, 140.0),
            bubble_at(40.0, 141.0),
            // alone on its row
            bubble_at(10.0, 300.0),
        ];
        let rows = group_bubbles_into_rows(&bubbles, 800);
        assert_eq!(rows.len(), 2);
        let first_row = rows[0].iter().map(|b| b.center.x).collect::<Vec<_>>();
        assert_eq!(first_row, vec![10.0, 40.0, 70.0]);
        assert_eq!(rows[1].len(), 2);
    }

    #[test]
    fn test_split_row_at_section_gaps() {
        let mut row = Vec::new();
        for section in 0..2 {
            for choice in 0..4 {
                row.push(bubble_at(section as f32 * 200.0 + choice as f32 * 30.0, 50.0));
            }
        }
        let groups = split_row_at_gaps(&row, 4, 1.8);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1][0].center.x, 200.0);
    }

    #[test]
    fn test_split_evenly_spaced_row_into_chunks() {
        let row = (0..8).map(|i| bubble_at(i as f32 * 30.0, 50.0)).collect::<Vec<_>>();
        let groups = split_row_at_gaps(&row, 4, 1.8);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 4));
    }

    #[test]
    fn test_questions_numbered_down_columns() {
        let mut bubbles = Vec::new();
        for section in 0..2 {
            for row in 0..3 {
                for choice in 0..4 {
                    bubbles.push(bubble_at(
                        50.0 + section as f32 * 250.0 + choice as f32 * 30.0,
                        100.0 + row as f32 * 40.0,
                    ));
                }
            }
        }
        let questions = group_bubbles_into_questions(&bubbles, 800, 4, 1.8);
        assert_eq!(questions.len(), 6);
        assert_eq!(questions[0][0].1.center, Point::new(50.0, 100.0));
        assert_eq!(questions[2][0].1.center, Point::new(50.0, 180.0));
        assert_eq!(questions[3][0].1.center, Point::new(300.0, 100.0));
        for question in &questions {
            let slots = question.iter().map(|(choice, _)| *choice).collect::<Vec<_>>();
            assert_eq!(slots, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_missing_bubbles_keep_choice_slots() {
        let mut bubbles = Vec::new();
        for section in 0..2 {
            for row in 0..3 {
                for choice in 0..4 {
                    // row 1 lost its A bubble in both sections, row 2 its C
                    // bubble in the first
                    if (row == 1 && choice == 0) || (section == 0 && row == 2 && choice == 2) {
                        continue;
                    }
                    bubbles.push(bubble_at(
                        50.0 + section as f32 * 250.0 + choice as f32 * 30.0,
                        100.0 + row as f32 * 40.0,
                    ));
                }
            }
        }

        let questions = group_bubbles_into_questions(&bubbles, 800, 4, 1.8);
        let slots = questions
            .iter()
            .map(|question| question.iter().map(|(choice, _)| *choice).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(
            slots,
            vec![
                vec![0, 1, 2, 3],
                vec![1, 2, 3],
                vec![0, 1, 3],
                vec![0, 1, 2, 3],
                vec![1, 2, 3],
                vec![0, 1, 2, 3],
            ]
        );
        assert_eq!(questions[1][0].1.center, Point::new(80.0, 140.0));
        assert_eq!(questions[4][2].1.center, Point::new(390.0, 140.0));
    }
}

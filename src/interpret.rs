use std::path::{Path, PathBuf};

use image::GrayImage;
use log::{debug, info, warn};
use logging_timer::time;
use rayon::prelude::*;
use serde::Serialize;

use crate::answer_key::{AnswerKeyStore, KeySetName, KeyStoreError};
use crate::config::{ConfigError, DetectorParams, SheetLocation};
use crate::debug::{draw_sheet_outline_debug_image_mut, ImageDebugWriter};
use crate::ensemble::{run_methods, select_best, MethodFailure, MethodResult};
use crate::geometry::Quadrilateral;
use crate::normalize::{load_sheet_image, normalize_image, ImageLoadError};
use crate::score::{grade, KeySelection, ScoreReport};
use crate::sheet::{find_sheet_quadrilateral, rectify_sheet, RectifiedSheet, SheetError};
use crate::types::SheetShape;

#[derive(Debug, Clone)]
pub struct InterpretOptions {
    pub debug: bool,
    pub params: DetectorParams,
    pub shape: SheetShape,
    pub key_selection: KeySelection,
}

impl InterpretOptions {
    /// Checks the settings shared by every sheet: the shape, the detector
    /// params and a named key set.
    pub fn validate(&self, store: &AnswerKeyStore) -> Result<(), InterpretSheetError> {
        if !self.shape.is_valid() {
            return Err(InterpretSheetError::InvalidShape(self.shape));
        }
        self.params.validate()?;
        if let KeySelection::Named(name) = &self.key_selection {
            store.get(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretSheetError {
    #[error(transparent)]
    ImageLoad(#[from] ImageLoadError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("no detection method succeeded: {}", format_failures(.0))]
    NoMethodSucceeded(Vec<MethodFailure>),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid sheet shape: {0:?}")]
    InvalidShape(SheetShape),
}

fn format_failures(failures: &[MethodFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything read from one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInterpretation {
    /// Where the sheet was found in the normalized image.
    pub corners: Quadrilateral,
    /// The selected method's answers.
    pub method: MethodResult,
    /// Every method that ran, in configured order, including the selected one.
    pub candidates: Vec<MethodResult>,
    pub key_set: Option<KeySetName>,
    pub report: Option<ScoreReport>,
}

/// Normalizes a raw grayscale image and warps the answer sheet in it to the
/// rectified size.
#[time]
pub fn prepare_sheet(
    img: &GrayImage,
    params: &DetectorParams,
    debug: &ImageDebugWriter,
) -> Result<RectifiedSheet, InterpretSheetError> {
    let normalized = normalize_image(img, params.working_size, &params.normalize);
    let corners = match params.sheet_location {
        SheetLocation::Contour => find_sheet_quadrilateral(&normalized, &params.locator)?,
        SheetLocation::FullFrame => {
            Quadrilateral::full_frame(normalized.width(), normalized.height())
        }
    };
    debug!("sheet corners: {:?}", corners);

    debug.write("sheet", &normalized, |canvas| {
        draw_sheet_outline_debug_image_mut(canvas, &corners)
    });

    Ok(rectify_sheet(&normalized, &corners, params.rectified_size)?)
}

/// Runs the method ensemble over a rectified sheet and returns the selected
/// result together with every successful candidate.
pub fn read_answers(
    rectified: &GrayImage,
    shape: SheetShape,
    params: &DetectorParams,
    debug: &ImageDebugWriter,
) -> Result<(MethodResult, Vec<MethodResult>), InterpretSheetError> {
    let (candidates, failures) = run_methods(rectified, shape, params, debug);
    let best = match select_best(&candidates) {
        Some(best) => best.clone(),
        None => return Err(InterpretSheetError::NoMethodSucceeded(failures)),
    };
    debug!(
        "selected method {} with score {:.3}",
        best.method, best.selection_score
    );
    Ok((best, candidates))
}

/// Reads and grades one already-loaded sheet image. Grading is skipped when
/// the store is empty and no key set was named.
#[time]
pub fn interpret_image(
    img: &GrayImage,
    options: &InterpretOptions,
    store: &AnswerKeyStore,
    debug: &ImageDebugWriter,
) -> Result<SheetInterpretation, InterpretSheetError> {
    options.validate(store)?;

    let sheet = prepare_sheet(img, &options.params, debug)?;
    let (method, candidates) = read_answers(&sheet.image, options.shape, &options.params, debug)?;

    let graded = match options.key_selection {
        KeySelection::Auto if store.is_empty() => None,
        _ => Some(grade(&method.answers, store, &options.key_selection)?),
    };
    let (key_set, report) = match graded {
        Some((key_set, report)) => (Some(key_set), Some(report)),
        None => (None, None),
    };

    Ok(SheetInterpretation {
        corners: sheet.corners,
        method,
        candidates,
        key_set,
        report,
    })
}

/// Loads, reads and grades the sheet at `path`.
#[time]
pub fn interpret_sheet(
    path: &Path,
    options: &InterpretOptions,
    store: &AnswerKeyStore,
) -> Result<SheetInterpretation, InterpretSheetError> {
    let img = load_sheet_image(path)?;
    let debug = if options.debug {
        ImageDebugWriter::new(path.to_path_buf())
    } else {
        ImageDebugWriter::disabled()
    };
    interpret_image(&img, options, store, &debug)
}

/// Interprets sheets in parallel. Invalid options fail the whole batch
/// before any sheet is read. Otherwise results are in input order, and one
/// sheet's failure does not affect the others.
pub fn interpret_batch(
    paths: &[PathBuf],
    options: &InterpretOptions,
    store: &AnswerKeyStore,
) -> Result<Vec<Result<SheetInterpretation, InterpretSheetError>>, InterpretSheetError> {
    options.validate(store)?;
    Ok(paths
        .par_iter()
        .map(|path| {
            let result = interpret_sheet(path, options, store);
            if let Err(e) = &result {
                warn!("{}: {}", path.display(), e);
            }
            result
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    /// Mean percentage over sheets that were read and graded.
    pub mean_percentage: Option<f64>,
}

impl BatchSummary {
    pub fn from_results(results: &[Result<SheetInterpretation, InterpretSheetError>]) -> Self {
        let processed = results.iter().filter(|r| r.is_ok()).count();
        let percentages: Vec<f64> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter_map(|interpretation| interpretation.report.as_ref())
            .map(|report| report.percentage)
            .collect();
        let mean_percentage = if percentages.is_empty() {
            None
        } else {
            Some(percentages.iter().sum::<f64>() / percentages.len() as f64)
        };

        let summary = Self {
            processed,
            failed: results.len() - processed,
            mean_percentage,
        };
        info!("{:?}", summary);
        summary
    }
}

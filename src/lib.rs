//! Reads multiple-choice answers from photographed OMR answer sheets and
//! grades them against answer keys.
//!
//! A sheet image is normalized, its boundary located and warped to a frontal
//! view, then read by an ensemble of detection methods. The most plausible
//! method's answers are graded against a named or auto-detected key set.

pub mod answer_key;
pub mod bubbles;
pub mod calibrate;
pub mod config;
pub mod debug;
pub mod decide;
pub mod ensemble;
pub mod geometry;
pub mod image_utils;
pub mod interpret;
pub mod layout;
pub mod normalize;
pub mod score;
pub mod scoring;
pub mod sheet;
pub mod types;

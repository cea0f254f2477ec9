//! Image preprocessing applied to each page before recognition.
//!
//! A [`PreprocessMode`] is a named recipe: pick a grayscale source channel,
//! then run a short list of [`Filter`]s over it. Picking the red channel
//! turns red highlighter and stamps white while black ink stays black, which
//! is why the `remove-red`, `soft` and `clean` recipes start there.
//!
//! | Mode | Source | Filters |
//! |------|--------|---------|
//! | none | original image | |
//! | grayscale | luma | |
//! | binarize | luma | threshold |
//! | contrast | luma | contrast |
//! | sharpen | luma | sharpen |
//! | denoise | luma | median |
//! | remove-red | red channel | |
//! | remove-blue | blue channel | |
//! | soft | red channel | contrast, sharpen |
//! | clean | red channel | contrast, sharpen, median, threshold |
//! | all | luma | contrast, sharpen, median, threshold |

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{stretch_contrast, threshold, ThresholdType};
use imageproc::filter::{filter3x3, median_filter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named preprocessing recipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreprocessMode {
    #[default]
    None,
    Grayscale,
    Binarize,
    Contrast,
    Sharpen,
    Denoise,
    RemoveRed,
    RemoveBlue,
    Soft,
    Clean,
    All,
}

impl PreprocessMode {
    pub const ALL_MODES: [PreprocessMode; 11] = [
        PreprocessMode::None,
        PreprocessMode::Grayscale,
        PreprocessMode::Binarize,
        PreprocessMode::Contrast,
        PreprocessMode::Sharpen,
        PreprocessMode::Denoise,
        PreprocessMode::RemoveRed,
        PreprocessMode::RemoveBlue,
        PreprocessMode::Soft,
        PreprocessMode::Clean,
        PreprocessMode::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreprocessMode::None => "none",
            PreprocessMode::Grayscale => "grayscale",
            PreprocessMode::Binarize => "binarize",
            PreprocessMode::Contrast => "contrast",
            PreprocessMode::Sharpen => "sharpen",
            PreprocessMode::Denoise => "denoise",
            PreprocessMode::RemoveRed => "remove-red",
            PreprocessMode::RemoveBlue => "remove-blue",
            PreprocessMode::Soft => "soft",
            PreprocessMode::Clean => "clean",
            PreprocessMode::All => "all",
        }
    }

    /// One-line help text.
    pub fn description(&self) -> &'static str {
        match self {
            PreprocessMode::None => "No preprocessing",
            PreprocessMode::Grayscale => "Convert to grayscale",
            PreprocessMode::Binarize => "Convert to black/white (good for faded text)",
            PreprocessMode::Contrast => "Enhance contrast",
            PreprocessMode::Sharpen => "Sharpen edges",
            PreprocessMode::Denoise => "Remove noise/speckles",
            PreprocessMode::RemoveRed => "Remove red highlights/marks only",
            PreprocessMode::RemoveBlue => "Remove blue highlights/marks only",
            PreprocessMode::Soft => "Remove red + contrast + sharpen (no binarization)",
            PreprocessMode::Clean => "Remove red + all enhancements including binarization",
            PreprocessMode::All => "Apply all preprocessing (no highlight removal)",
        }
    }

    /// Source channel and filter chain, or `None` to leave the image untouched.
    pub fn recipe(&self, threshold: u8) -> Option<(Channel, Vec<Filter>)> {
        use Filter::*;
        let recipe = match self {
            PreprocessMode::None => return None,
            PreprocessMode::Grayscale => (Channel::Luma, vec![]),
            PreprocessMode::Binarize => (Channel::Luma, vec![Threshold(threshold)]),
            PreprocessMode::Contrast => (Channel::Luma, vec![Contrast]),
            PreprocessMode::Sharpen => (Channel::Luma, vec![Sharpen]),
            PreprocessMode::Denoise => (Channel::Luma, vec![Median]),
            PreprocessMode::RemoveRed => (Channel::Red, vec![]),
            PreprocessMode::RemoveBlue => (Channel::Blue, vec![]),
            PreprocessMode::Soft => (Channel::Red, vec![Contrast, Sharpen]),
            PreprocessMode::Clean => (
                Channel::Red,
                vec![Contrast, Sharpen, Median, Threshold(threshold)],
            ),
            PreprocessMode::All => (
                Channel::Luma,
                vec![Contrast, Sharpen, Median, Threshold(threshold)],
            ),
        };
        Some(recipe)
    }
}

impl fmt::Display for PreprocessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreprocessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL_MODES
            .iter()
            .copied()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown preprocessing mode '{s}' (see --list-preprocess)"))
    }
}

/// Grayscale source of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Luma,
    Red,
    Blue,
}

impl Channel {
    fn extract(&self, img: &DynamicImage) -> GrayImage {
        let index = match self {
            Channel::Luma => return img.to_luma8(),
            Channel::Red => 0,
            Channel::Blue => 2,
        };
        let rgb = img.to_rgb8();
        GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            Luma([rgb.get_pixel(x, y)[index]])
        })
    }
}

/// Single grayscale filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Stretch values away from the mean by a factor of 2.
    Contrast,
    /// 3×3 sharpening kernel (centre 2, neighbours -1/8).
    Sharpen,
    /// 3×3 median, removes salt-and-pepper speckles.
    Median,
    /// Pixels above the threshold become white, the rest black.
    Threshold(u8),
}

const SHARPEN: [f32; 9] = [
    -0.125, -0.125, -0.125, //
    -0.125, 2.0, -0.125, //
    -0.125, -0.125, -0.125,
];

impl Filter {
    pub fn apply(&self, img: GrayImage) -> GrayImage {
        match *self {
            Filter::Contrast => contrast(&img, 2.0),
            Filter::Sharpen => filter3x3::<Luma<u8>, f32, u8>(&img, &SHARPEN),
            Filter::Median => median_filter(&img, 1, 1),
            Filter::Threshold(t) => threshold(&img, t, ThresholdType::Binary),
        }
    }
}

/// Linear stretch around the mean: the band `mean ± 127.5 / factor` maps onto `0..=255`.
fn contrast(img: &GrayImage, factor: f32) -> GrayImage {
    let n = (img.width() as u64 * img.height() as u64).max(1);
    let mean = img.pixels().map(|p| p[0] as u64).sum::<u64>() as f32 / n as f32;
    let half = 127.5 / factor;
    let lower = (mean - half).round().clamp(0.0, 254.0) as u8;
    let upper = ((mean + half).round().clamp(0.0, 255.0) as u8).max(lower + 1);
    stretch_contrast(img, lower, upper, 0, 255)
}

/// Applies a mode's recipe to page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    pub mode: PreprocessMode,
    /// Binarisation threshold (0–255); lower keeps more black.
    pub threshold: u8,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            mode: PreprocessMode::None,
            threshold: 140,
        }
    }
}

impl Preprocessor {
    pub fn new(mode: PreprocessMode, threshold: u8) -> Self {
        Self { mode, threshold }
    }

    pub fn apply(&self, img: DynamicImage) -> DynamicImage {
        let Some((channel, filters)) = self.mode.recipe(self.threshold) else {
            return img;
        };
        let gray = filters
            .iter()
            .fold(channel.extract(&img), |acc, f| f.apply(acc));
        DynamicImage::ImageLuma8(gray)
    }
}

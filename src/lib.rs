pub mod consts {
    /// Longest handle the platform accepts.
    pub const MAX_HANDLE_LEN: usize = 30;

    /// Characters that separate words inside a handle.
    pub const SEPARATORS: [char; 2] = ['.', '_'];

    /// Letters a dot is commonly misread as.
    pub const DOT_LOOKALIKES: [char; 3] = ['o', 'O', '0'];

    /// Handles closer than this are treated as the same entity.
    pub const NEAR_DUPLICATE_DISTANCE: usize = 2;

    /// Quality score below which confidence is pulled down.
    pub const QUALITY_FLOOR: f32 = 0.5;

    pub const VERIFIED_FILE: &str = "verified_handles.md";
    pub const REVIEW_FILE: &str = "needs_review.md";
    pub const REPORT_FILE: &str = "extraction_report.md";
    pub const DIAGNOSTICS_FILE: &str = "diagnostics.json";
}

pub mod error;
pub mod config;
pub mod text;
pub mod candidate;
pub mod aggregate;
pub mod correction;
pub mod consensus;
pub mod quality;
pub mod classify;
pub mod ocr;
pub mod pipeline;
pub mod store;

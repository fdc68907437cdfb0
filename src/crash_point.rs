//! Crash point injection for durability testing
//!
//! When `JRNL_CRASH_POINT` names a point, reaching that point terminates
//! the process via `std::process::abort()`: no cleanup, no unwinding. Used
//! to leave journal files in the exact state they had at that instant.
//!
//! ```bash
//! JRNL_CRASH_POINT=wmgr_before_page_submit jrnlstore write --config jrnl.json
//! ```

use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("JRNL_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `JRNL_CRASH_POINT` equals `name`.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Aborts the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    /// Page buffer complete, write not yet handed to the engine
    pub const WMGR_BEFORE_PAGE_SUBMIT: &str = "wmgr_before_page_submit";
    /// New file header handed to the engine, no data page yet
    pub const WMGR_AFTER_FHDR_SUBMIT: &str = "wmgr_after_fhdr_submit";
    /// Active file closed, ring not yet advanced
    pub const WMGR_BEFORE_ROTATE: &str = "wmgr_before_rotate";

    pub fn all() -> &'static [&'static str] {
        &[WMGR_BEFORE_PAGE_SUBMIT, WMGR_AFTER_FHDR_SUBMIT, WMGR_BEFORE_ROTATE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_disabled_by_default() {
        assert!(!crash_point_enabled("test_point"));
    }

    #[test]
    fn test_crash_point_names_are_lowercase_with_underscores() {
        assert_eq!(points::all().len(), 3);
        for point in points::all() {
            assert!(
                point.chars().all(|c| c.is_lowercase() || c == '_'),
                "Crash point '{}' should be lowercase with underscores",
                point
            );
        }
    }
}

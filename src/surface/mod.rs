//! Multi-expiry calibration.
//!
//! A [`FittedVolSurface`] is a collection of independently fitted
//! [`FittedVolCurve`]s keyed by expiry date. Expiries that fail to calibrate
//! are recorded with their error instead of aborting the whole surface.

pub mod arbitrage;
pub mod calibrator;

pub use arbitrage::{CalendarViolation, SurfaceDiagnostics, calendar_violations};
pub use calibrator::SurfaceCalibrator;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::{self, VolProbError};
use crate::smile::FittedVolCurve;

/// Per-expiry fitted curves, calibration failures and calendar diagnostics.
#[derive(Debug)]
pub struct FittedVolSurface {
    curves: BTreeMap<NaiveDate, FittedVolCurve>,
    failures: BTreeMap<NaiveDate, VolProbError>,
    calendar_violations: Vec<CalendarViolation>,
}

impl FittedVolSurface {
    pub(crate) fn new(
        curves: BTreeMap<NaiveDate, FittedVolCurve>,
        failures: BTreeMap<NaiveDate, VolProbError>,
        calendar_violations: Vec<CalendarViolation>,
    ) -> Self {
        Self {
            curves,
            failures,
            calendar_violations,
        }
    }

    /// Successfully fitted curves in expiry order.
    pub fn curves(&self) -> &BTreeMap<NaiveDate, FittedVolCurve> {
        &self.curves
    }

    /// Curve for one expiry.
    ///
    /// # Errors
    /// Returns [`VolProbError::ExpiryNotFound`] if the expiry was not fitted.
    pub fn curve(&self, expiry: NaiveDate) -> error::Result<&FittedVolCurve> {
        self.curves
            .get(&expiry)
            .ok_or(VolProbError::ExpiryNotFound { expiry })
    }

    /// Expiries that failed, with the reason.
    pub fn failures(&self) -> &BTreeMap<NaiveDate, VolProbError> {
        &self.failures
    }

    pub fn failure(&self, expiry: NaiveDate) -> Option<&VolProbError> {
        self.failures.get(&expiry)
    }

    /// Fitted expiries in ascending order.
    pub fn expiries(&self) -> Vec<NaiveDate> {
        self.curves.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    pub fn calendar_violations(&self) -> &[CalendarViolation] {
        &self.calendar_violations
    }

    /// Butterfly reports per expiry plus the calendar scan.
    pub fn diagnostics(&self) -> SurfaceDiagnostics {
        let smile_reports: BTreeMap<_, _> = self
            .curves
            .iter()
            .map(|(d, c)| (*d, c.diagnostics().arbitrage.clone()))
            .collect();
        let is_free =
            self.calendar_violations.is_empty() && smile_reports.values().all(|r| r.is_free);
        SurfaceDiagnostics {
            smile_reports,
            calendar_violations: self.calendar_violations.clone(),
            is_free,
        }
    }
}

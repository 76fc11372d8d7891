//! World / metrics (§2, Glossary "Utopia vs Actual"): a truth-side observer of what agents
//! actually imaged vs what was merely scheduled. Never consulted by agents — the simulation loop
//! feeds it ground-truth observations after each step's sequential merge, purely for reporting.
//!
//! Per cell, it tracks the most recent *scheduled* observation end-time (any agent's owned
//! activity touching that cell, confirmed or not) and the most recent *confirmed* one, and reports
//! the gap between `now` and each as the utopia/actual revisit time (§6 `world_metrics.csv`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::activity::CellCoord;
use crate::environment::GeoLut;
use crate::error::IoError;
use crate::report::{WorldMetricsReporter, WorldMetricsRow};

#[derive(Debug, Clone, Copy, Default)]
struct CellRevisit {
    last_scheduled: Option<f64>,
    last_confirmed: Option<f64>,
}

/// Truth-side revisit-time accumulator (observer only).
pub struct World {
    lut: Arc<GeoLut>,
    cells: HashMap<CellCoord, CellRevisit>,
}

impl World {
    pub fn new(lut: Arc<GeoLut>) -> Self {
        World { lut, cells: HashMap::new() }
    }

    /// Records ground truth: some agent's activity touches `cell`, ending at `end`. `confirmed`
    /// distinguishes "this capture actually happened" from "this capture is merely scheduled" —
    /// the latter still advances the utopia timeline (§6: "the revisit time that would be achieved
    /// if every scheduled capture actually happened").
    pub fn observe(&mut self, cell: CellCoord, end: f64, confirmed: bool) {
        let entry = self.cells.entry(cell).or_default();
        entry.last_scheduled = Some(entry.last_scheduled.map_or(end, |p| p.max(end)));
        if confirmed {
            entry.last_confirmed = Some(entry.last_confirmed.map_or(end, |p| p.max(end)));
        }
    }

    /// `(actual_revisit, utopia_revisit)` at `now` for a cell that has been observed at least
    /// once; `None` for a cell with no observation yet (no fact to measure a gap against).
    pub fn revisit_at(&self, cell: CellCoord, now: f64) -> Option<(f64, f64)> {
        let entry = self.cells.get(&cell)?;
        let utopia = entry.last_scheduled.map(|t| now - t)?;
        let actual = entry.last_confirmed.map(|t| now - t).unwrap_or(utopia);
        Some((actual, utopia))
    }

    /// Coarse quadrant label for a cell, used as the `region` column; `spot` carries the precise
    /// grid coordinate.
    fn region_of(&self, cell: CellCoord) -> String {
        match self.lut.latlon(cell) {
            Some(ll) => {
                let ns = if ll.lat_deg >= 0.0 { "N" } else { "S" };
                let ew = if ll.lon_deg >= 0.0 { "E" } else { "W" };
                format!("{ns}{ew}")
            }
            None => "unknown".to_string(),
        }
    }

    /// Writes one `world_metrics.csv` row per observed cell at `now`.
    pub fn report(&self, now: f64, reporter: &mut WorldMetricsReporter) -> Result<(), IoError> {
        for &cell in self.cells.keys() {
            if let Some((actual, utopia)) = self.revisit_at(cell, now) {
                reporter.record(WorldMetricsRow {
                    t: now,
                    region: self.region_of(cell),
                    spot: format!("{},{}", cell.0, cell.1),
                    actual_revisit: actual,
                    utopia_revisit: utopia,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lut() -> Arc<GeoLut> {
        Arc::new(GeoLut::build(4, 4, 90.0, 45.0))
    }

    #[test]
    fn unobserved_cell_has_no_revisit() {
        let world = World::new(lut());
        assert!(world.revisit_at((0, 0), 10.0).is_none());
    }

    #[test]
    fn scheduled_without_confirmation_only_moves_utopia() {
        let mut world = World::new(lut());
        world.observe((0, 0), 5.0, false);
        let (actual, utopia) = world.revisit_at((0, 0), 10.0).unwrap();
        assert_eq!(utopia, 5.0);
        assert_eq!(actual, 5.0);
    }

    #[test]
    fn confirmed_capture_advances_actual_independently() {
        let mut world = World::new(lut());
        world.observe((0, 0), 5.0, true);
        world.observe((0, 0), 8.0, false);
        let (actual, utopia) = world.revisit_at((0, 0), 10.0).unwrap();
        assert_eq!(actual, 5.0);
        assert_eq!(utopia, 2.0);
    }

    #[test]
    fn report_emits_one_row_per_observed_cell() {
        let mut world = World::new(lut());
        world.observe((0, 0), 1.0, true);
        world.observe((1, 1), 2.0, true);
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = WorldMetricsReporter::create(dir.path()).unwrap();
        world.report(5.0, &mut reporter).unwrap();
        reporter.flush().unwrap();
        let contents = std::fs::read_to_string(dir.path().join("world_metrics.csv")).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }
}

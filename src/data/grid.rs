//! Grid descriptor: a logical index space built from ordered 1-D axes.
//!
//! Axes are listed fastest-varying first, so the flat index of a cell with
//! per-axis coordinates `(i0, i1, ..)` is `i0 + n0 * (i1 + n1 * (..))`.
//! Composite grids (e.g. horizontal x vertical) are formed by concatenating
//! the axis lists of their constituents.

use crate::coupler_error::CouplerError;
use crate::debug_invariants::DebugInvariants;
use serde::{Deserialize, Serialize};

/// One constituent 1-D axis of a grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    name: String,
    size: usize,
    /// Cell edges, `size + 1` monotone values, when the axis carries coordinates.
    bounds: Option<Vec<f64>>,
}

impl Axis {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            bounds: None,
        }
    }

    /// Axis whose cells are delimited by `bounds` (`bounds.len() - 1` cells).
    pub fn with_bounds(name: impl Into<String>, bounds: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            size: bounds.len().saturating_sub(1),
            bounds: Some(bounds),
        }
    }

    /// Evenly spaced cells covering `[start, end)`.
    pub fn uniform(name: impl Into<String>, size: usize, start: f64, end: f64) -> Self {
        let step = (end - start) / size as f64;
        let bounds = (0..=size).map(|i| start + step * i as f64).collect();
        Self {
            name: name.into(),
            size,
            bounds: Some(bounds),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bounds(&self) -> Option<&[f64]> {
        self.bounds.as_deref()
    }

    /// Same name and size; coordinates are not compared.
    pub fn same_extent(&self, other: &Axis) -> bool {
        self.name == other.name && self.size == other.size
    }
}

/// Immutable definition of a (possibly composite) grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridDescriptor {
    name: String,
    axes: Vec<Axis>,
    is_sphere: bool,
    mask: Option<Vec<bool>>,
    area: Option<Vec<f64>>,
}

impl GridDescriptor {
    /// Define a grid from its axes, fastest-varying first.
    ///
    /// # Errors
    /// `InvalidGrid` when there are no axes, an axis is empty, axis names
    /// repeat, or axis bounds are malformed.
    pub fn new(name: impl Into<String>, axes: Vec<Axis>) -> Result<Self, CouplerError> {
        let g = Self {
            name: name.into(),
            axes,
            is_sphere: false,
            mask: None,
            area: None,
        };
        g.validate_invariants()?;
        Ok(g)
    }

    /// Concatenate the axes of `parts` (in order) into a new grid.
    pub fn composite(name: impl Into<String>, parts: &[&GridDescriptor]) -> Result<Self, CouplerError> {
        let axes = parts.iter().flat_map(|g| g.axes.iter().cloned()).collect();
        let mut g = Self::new(name, axes)?;
        g.is_sphere = parts.iter().any(|p| p.is_sphere);
        Ok(g)
    }

    pub fn sphere(mut self, on: bool) -> Self {
        self.is_sphere = on;
        self
    }

    /// Attach a static mask (`true` = active cell).
    pub fn with_mask(mut self, mask: Vec<bool>) -> Result<Self, CouplerError> {
        self.mask = Some(mask);
        self.validate_invariants()?;
        Ok(self)
    }

    /// Attach per-cell areas.
    pub fn with_area(mut self, area: Vec<f64>) -> Result<Self, CouplerError> {
        self.area = Some(area);
        self.validate_invariants()?;
        Ok(self)
    }

    /// Copy of this grid with runtime cell edges, one list per axis.
    ///
    /// An empty list keeps that axis's registered bounds. The cell counts
    /// cannot change, so every non-empty list holds `size + 1` edges.
    pub fn with_coordinates(&self, coords: &[Vec<f64>]) -> Result<Self, CouplerError> {
        if coords.len() != self.axes.len() {
            return Err(self.invalid(format!(
                "{} coordinate lists for {} axes",
                coords.len(),
                self.axes.len()
            )));
        }
        let mut g = self.clone();
        for (a, edges) in g.axes.iter_mut().zip(coords) {
            if !edges.is_empty() {
                a.bounds = Some(edges.clone());
            }
        }
        g.validate_invariants()?;
        Ok(g)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn total_size(&self) -> usize {
        self.axes.iter().map(|a| a.size).product()
    }

    pub fn is_sphere(&self) -> bool {
        self.is_sphere
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    pub fn area(&self) -> Option<&[f64]> {
        self.area.as_deref()
    }

    /// Same axes (names and sizes, in order) and same sphere flag.
    pub fn same_structure(&self, other: &GridDescriptor) -> bool {
        self.is_sphere == other.is_sphere
            && self.axes.len() == other.axes.len()
            && self.axes.iter().zip(&other.axes).all(|(a, b)| a.same_extent(b))
    }

    /// Require that `other` describes a grid of the same total size.
    pub fn expect_same_size(&self, other: &GridDescriptor) -> Result<(), CouplerError> {
        if self.total_size() != other.total_size() {
            return Err(CouplerError::GridMismatch {
                src_grid: self.name.clone(),
                dst_grid: other.name.clone(),
                reason: format!(
                    "total sizes differ ({} vs {})",
                    self.total_size(),
                    other.total_size()
                ),
            });
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> CouplerError {
        CouplerError::InvalidGrid {
            grid: self.name.clone(),
            reason,
        }
    }
}

impl DebugInvariants for GridDescriptor {
    fn validate_invariants(&self) -> Result<(), CouplerError> {
        if self.axes.is_empty() {
            return Err(self.invalid("grid has no axes".into()));
        }
        for (i, a) in self.axes.iter().enumerate() {
            if a.size == 0 {
                return Err(self.invalid(format!("axis `{}` is empty", a.name)));
            }
            if self.axes[..i].iter().any(|b| b.name == a.name) {
                return Err(self.invalid(format!("axis `{}` appears twice", a.name)));
            }
            if let Some(b) = &a.bounds {
                if b.len() != a.size + 1 {
                    return Err(self.invalid(format!(
                        "axis `{}` has {} bounds for {} cells",
                        a.name,
                        b.len(),
                        a.size
                    )));
                }
                let increasing = b.windows(2).all(|w| w[0] < w[1]);
                let decreasing = b.windows(2).all(|w| w[0] > w[1]);
                if !(increasing || decreasing) {
                    return Err(self.invalid(format!("axis `{}` bounds are not monotone", a.name)));
                }
            }
        }
        let n = self.total_size();
        if let Some(m) = &self.mask {
            if m.len() != n {
                return Err(self.invalid(format!("mask has {} entries for {n} cells", m.len())));
            }
        }
        if let Some(a) = &self.area {
            if a.len() != n {
                return Err(self.invalid(format!("area has {} entries for {n} cells", a.len())));
            }
        }
        Ok(())
    }
}

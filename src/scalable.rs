//! # Scalable Formation
//!
//! Rectangular grid formation whose three coupled quantities (member count,
//! footprint, spacing) are resolved against each other. The active
//! [`DistributionMode`] names the two primary inputs; the third is derived and
//! written back.
//!
//! ## Layout rules
//!
//! Member *i* sits at `(r + (i mod columns)·spacing.x, r + (i div columns)·spacing.y)`
//! with `r` the member radius, then the whole grid is shifted by
//! `-footprint.x / 2` horizontally so the formation origin is centred on the
//! front row.
//!
//! - **QuantityAndFootprint**: `columns ≈ round(sqrt(q · w/h))`,
//!   `rows = ceil(q / columns)`, spacing `(footprint − 2r) / (count − 1)`.
//!   When spacing would fall below the configured minimum it is clamped, the
//!   grid counts that fit at that spacing are recomputed and the quantity is
//!   overwritten with `columns · rows`.
//! - **DensityAndQuantity**: grid counts from the quantity and the proportions
//!   of the last footprint set by the caller; the footprint is derived.
//! - **DensityAndFootprint**: `floor(footprint / density)` per axis; the
//!   quantity is derived.
//!
//! [`solve_layout`] is pure and can be called from tooling without a live
//! formation; [`ScalableFormation`] wraps it with setters, write-back of the
//! derived value and member reconciliation.

use crate::collaborators::MemberFactory;
use crate::config::ScalableConfig;
use crate::formation::{Formation, FormationError, LayoutChanged, LayoutEvents, LayoutListener, SubscriptionId};
use crate::structs::{AgentId, Point, Pose, Vector2D};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Absorbs float error when counting how many spacings fit in an extent.
const COUNT_EPSILON: f64 = 1e-9;

/// Which two of {quantity, footprint, density} drive the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistributionMode {
    #[default]
    QuantityAndFootprint,
    DensityAndQuantity,
    DensityAndFootprint,
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistributionMode::QuantityAndFootprint => "QuantityAndFootprint",
            DistributionMode::DensityAndQuantity => "DensityAndQuantity",
            DistributionMode::DensityAndFootprint => "DensityAndFootprint",
        };
        f.write_str(name)
    }
}

impl FromStr for DistributionMode {
    type Err = FormationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QuantityAndFootprint" => Ok(DistributionMode::QuantityAndFootprint),
            "DensityAndQuantity" => Ok(DistributionMode::DensityAndQuantity),
            "DensityAndFootprint" => Ok(DistributionMode::DensityAndFootprint),
            other => Err(FormationError::UnknownMode(other.to_string())),
        }
    }
}

/// Inputs of one layout computation.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRequest {
    pub mode: DistributionMode,
    pub member_radius: f64,
    pub min_spacing: Vector2D,
    pub footprint: Vector2D,
    pub density: Vector2D,
    pub quantity: usize,
    /// Aspect reference for `DensityAndQuantity`; the footprint last chosen by
    /// the caller rather than the derived one.
    pub proportions: Vector2D,
}

/// Front corners of the first row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hinges {
    pub front_left: Point,
    pub front_right: Point,
}

/// Output of [`solve_layout`]. `spacing`, `footprint` and `quantity` are the
/// resolved values, whichever of them was an input.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSolution {
    pub positions: Vec<Point>,
    pub columns: usize,
    pub rows: usize,
    pub spacing: Vector2D,
    pub footprint: Vector2D,
    pub quantity: usize,
    /// True when an infeasible quantity/footprint pair was corrected.
    pub corrected: bool,
    pub hinges: Option<Hinges>,
}

fn inner_extent(extent: f64, radius: f64) -> f64 {
    (extent - 2.0 * radius).max(0.0)
}

fn grid_for_quantity(quantity: usize, aspect: Vector2D) -> (usize, usize) {
    let ratio = if aspect.x > 0.0 && aspect.y > 0.0 {
        aspect.x / aspect.y
    } else {
        1.0
    };
    let upper = quantity.max(1);
    let columns = ((quantity as f64 * ratio).sqrt().round() as usize).clamp(1, upper);
    let rows = quantity.div_ceil(columns).max(1);
    (columns, rows)
}

/// Spacing that spreads `count` members across the inner extent. A single
/// member has no neighbour, so the floor is reported instead.
fn spread_spacing(extent: f64, radius: f64, count: usize, floor: f64) -> f64 {
    let inner = inner_extent(extent, radius);
    if count > 1 {
        inner / (count - 1) as f64
    } else {
        inner.max(floor)
    }
}

fn spread_grid(footprint: Vector2D, radius: f64, columns: usize, rows: usize, min: Vector2D) -> Vector2D {
    Vector2D::new(
        spread_spacing(footprint.x, radius, columns, min.x),
        spread_spacing(footprint.y, radius, rows, min.y),
    )
}

fn too_tight(count: usize, spacing: f64, min: f64) -> bool {
    count > 1 && spacing + COUNT_EPSILON < min
}

fn fits(columns: usize, rows: usize, spacing: Vector2D, min: Vector2D) -> bool {
    !too_tight(columns, spacing.x, min.x) && !too_tight(rows, spacing.y, min.y)
}

fn members_fitting(extent: f64, radius: f64, spacing: f64) -> usize {
    if spacing <= 0.0 {
        return 1;
    }
    let inner = inner_extent(extent, radius);
    ((inner / spacing + COUNT_EPSILON).floor() as usize).saturating_add(1)
}

fn cells_fitting(extent: f64, spacing: f64) -> usize {
    if spacing <= 0.0 {
        return 1;
    }
    ((extent / spacing + COUNT_EPSILON).floor() as usize).max(1)
}

fn clamp_spacing(density: Vector2D, min_spacing: Vector2D) -> Vector2D {
    Vector2D::new(density.x.max(min_spacing.x), density.y.max(min_spacing.y))
}

fn place_members(
    quantity: usize,
    columns: usize,
    spacing: Vector2D,
    radius: f64,
    footprint: Vector2D,
) -> Vec<Point> {
    let shift = -footprint.x / 2.0;
    (0..quantity)
        .map(|i| {
            let column = (i % columns) as f64;
            let row = (i / columns) as f64;
            Point::new(radius + column * spacing.x + shift, radius + row * spacing.y)
        })
        .collect()
}

fn find_hinges(positions: &[Point]) -> Option<Hinges> {
    let front_left = *positions.first()?;
    let front_right = *positions
        .iter()
        .max_by_key(|p| (OrderedFloat(p.x), Reverse(OrderedFloat(p.y))))?;
    Some(Hinges {
        front_left,
        front_right,
    })
}

/// Resolves quantity, footprint and spacing for `request.mode` and lays the
/// members out. Pure: identical requests give bit-identical solutions.
pub fn solve_layout(request: &LayoutRequest) -> LayoutSolution {
    let radius = request.member_radius;
    let min = request.min_spacing;

    let mut corrected = false;
    let (quantity, columns, rows, spacing, footprint) = match request.mode {
        DistributionMode::QuantityAndFootprint => {
            let footprint = request.footprint;
            let requested = request.quantity;
            let (columns, rows) = grid_for_quantity(requested, footprint);
            let spacing = spread_grid(footprint, radius, columns, rows, min);

            if requested == 0 || fits(columns, rows, spacing, min) {
                (requested, columns, rows, spacing, footprint)
            } else {
                // Largest full grid that fits; solving again with its quantity
                // reproduces this layout.
                let capacity =
                    members_fitting(footprint.x, radius, min.x) * members_fitting(footprint.y, radius, min.y);
                let (quantity, columns, rows, spacing) = (1..=requested.min(capacity))
                    .rev()
                    .find_map(|quantity| {
                        let (columns, rows) = grid_for_quantity(quantity, footprint);
                        let spacing = spread_grid(footprint, radius, columns, rows, min);
                        let full = columns * rows == quantity;
                        (full && fits(columns, rows, spacing, min)).then_some((quantity, columns, rows, spacing))
                    })
                    .unwrap_or((1, 1, 1, spread_grid(footprint, radius, 1, 1, min)));
                warn!(
                    requested,
                    corrected = quantity,
                    columns,
                    rows,
                    "requested quantity does not fit footprint at minimum spacing"
                );
                corrected = true;
                (quantity, columns, rows, spacing, footprint)
            }
        }
        DistributionMode::DensityAndQuantity => {
            let spacing = clamp_spacing(request.density, min);
            let quantity = request.quantity;
            let (columns, rows) = grid_for_quantity(quantity, request.proportions);
            let footprint = if quantity == 0 {
                request.footprint
            } else {
                Vector2D::new(
                    columns as f64 * spacing.x + 2.0 * radius,
                    rows as f64 * spacing.y + 2.0 * radius,
                )
            };
            (quantity, columns, rows, spacing, footprint)
        }
        DistributionMode::DensityAndFootprint => {
            let spacing = clamp_spacing(request.density, min);
            let footprint = request.footprint;
            let columns = cells_fitting(footprint.x, spacing.x);
            let rows = cells_fitting(footprint.y, spacing.y);
            (columns * rows, columns, rows, spacing, footprint)
        }
    };

    let positions = place_members(quantity, columns, spacing, radius, footprint);
    let hinges = find_hinges(&positions);
    LayoutSolution {
        positions,
        columns,
        rows,
        spacing,
        footprint,
        quantity,
        corrected,
        hinges,
    }
}

/// Runtime grid formation built on [`solve_layout`].
pub struct ScalableFormation {
    mode: DistributionMode,
    member_radius: f64,
    min_spacing: Vector2D,
    footprint: Vector2D,
    density: Vector2D,
    quantity: usize,
    proportions: Vector2D,
    solution: LayoutSolution,
    members: Vec<AgentId>,
    factory: Option<Box<dyn MemberFactory>>,
    pose: Pose,
    events: LayoutEvents,
    // One-shot: the next setter call is a derived write-back, not a new input.
    suppress_recompute: bool,
}

impl fmt::Debug for ScalableFormation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalableFormation")
            .field("mode", &self.mode)
            .field("quantity", &self.quantity)
            .field("footprint", &self.footprint)
            .field("density", &self.density)
            .field("members", &self.members.len())
            .finish()
    }
}

impl ScalableFormation {
    pub fn new(config: &ScalableConfig) -> Self {
        let mut formation = ScalableFormation {
            mode: config.mode,
            member_radius: config.member_radius,
            min_spacing: config.min_spacing,
            footprint: config.footprint,
            density: config.density,
            quantity: config.quantity,
            proportions: config.footprint,
            solution: LayoutSolution {
                positions: Vec::new(),
                columns: 1,
                rows: 1,
                spacing: config.density,
                footprint: config.footprint,
                quantity: 0,
                corrected: false,
                hinges: None,
            },
            members: Vec::new(),
            factory: None,
            pose: Pose::default(),
            events: LayoutEvents::new(),
            suppress_recompute: false,
        };
        formation.recompute();
        formation
    }

    pub fn mode(&self) -> DistributionMode {
        self.mode
    }

    pub fn quantity(&self) -> usize {
        self.quantity
    }

    pub fn footprint(&self) -> Vector2D {
        self.footprint
    }

    pub fn density(&self) -> Vector2D {
        self.density
    }

    pub fn min_spacing(&self) -> Vector2D {
        self.min_spacing
    }

    pub fn solution(&self) -> &LayoutSolution {
        &self.solution
    }

    pub fn hinges(&self) -> Option<Hinges> {
        self.solution.hinges
    }

    /// Snapshot of the current inputs, suitable for [`solve_layout`].
    pub fn request(&self) -> LayoutRequest {
        LayoutRequest {
            mode: self.mode,
            member_radius: self.member_radius,
            min_spacing: self.min_spacing,
            footprint: self.footprint,
            density: self.density,
            quantity: self.quantity,
            proportions: self.proportions,
        }
    }

    pub fn set_mode(&mut self, mode: DistributionMode) {
        self.mode = mode;
        self.recompute();
    }

    pub fn set_member_radius(&mut self, radius: f64) {
        self.member_radius = radius;
        self.recompute();
    }

    pub fn set_min_spacing(&mut self, min_spacing: Vector2D) {
        self.min_spacing = min_spacing;
        self.recompute();
    }

    pub fn set_quantity(&mut self, quantity: usize) {
        self.quantity = quantity;
        if std::mem::take(&mut self.suppress_recompute) {
            return;
        }
        self.recompute();
    }

    pub fn set_density(&mut self, density: Vector2D) {
        self.density = density;
        if std::mem::take(&mut self.suppress_recompute) {
            return;
        }
        self.recompute();
    }

    pub fn set_footprint(&mut self, footprint: Vector2D) {
        self.footprint = footprint;
        if std::mem::take(&mut self.suppress_recompute) {
            return;
        }
        self.proportions = footprint;
        self.recompute();
    }

    /// Spawns one member per slot and keeps `factory` to follow later
    /// quantity changes. Only the first call has an effect.
    pub fn generate_members(&mut self, factory: Box<dyn MemberFactory>) {
        if self.factory.is_some() {
            return;
        }
        self.factory = Some(factory);
        self.reconcile_members();
    }

    fn write_derived(&mut self, write: impl FnOnce(&mut Self)) {
        self.suppress_recompute = true;
        write(self);
        debug_assert!(!self.suppress_recompute, "derived write-back did not consume suppress flag");
    }

    fn recompute(&mut self) {
        let solution = solve_layout(&self.request());

        match self.mode {
            DistributionMode::QuantityAndFootprint => {
                let spacing = solution.spacing;
                self.write_derived(|f| f.set_density(spacing));
                if solution.corrected {
                    let quantity = solution.quantity;
                    self.write_derived(|f| f.set_quantity(quantity));
                }
            }
            DistributionMode::DensityAndQuantity => {
                let footprint = solution.footprint;
                self.write_derived(|f| f.set_footprint(footprint));
            }
            DistributionMode::DensityAndFootprint => {
                let quantity = solution.quantity;
                self.write_derived(|f| f.set_quantity(quantity));
            }
        }

        debug!(
            mode = %self.mode,
            quantity = solution.quantity,
            columns = solution.columns,
            rows = solution.rows,
            spacing_x = solution.spacing.x,
            spacing_y = solution.spacing.y,
            "scalable layout recomputed"
        );
        self.solution = solution;
        self.reconcile_members();

        let event = LayoutChanged {
            positions: self.solution.positions.clone(),
            radius: self.member_radius,
        };
        self.events.emit(&event);
    }

    fn reconcile_members(&mut self) {
        let Some(factory) = self.factory.as_mut() else {
            return;
        };
        let wanted = self.solution.positions.len();
        while self.members.len() > wanted {
            if let Some(surplus) = self.members.pop() {
                factory.despawn(surplus);
            }
        }
        for slot in self.members.len()..wanted {
            let member = factory.spawn(slot, self.solution.positions[slot]);
            self.members.push(member);
        }
    }
}

impl Formation for ScalableFormation {
    fn members(&self) -> &[AgentId] {
        &self.members
    }

    fn member_positions(&self) -> &[Point] {
        &self.solution.positions
    }

    fn member_radius(&self) -> f64 {
        self.member_radius
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    fn subscribe(&mut self, listener: LayoutListener) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

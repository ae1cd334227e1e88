//! Basal membrane geometry.
//!
//! The membrane is derived from two curvatures `(k1, k2)`:
//!
//! - both zero: the line `y = 0`, arc length is `x`, normal is `(0, 1)`;
//! - equal: a circle of radius `1/|k|` whose top (or bottom, for negative
//!   curvature) touches the origin;
//! - otherwise: an ellipse with semi-axes `1/|k1|` (horizontal) and
//!   `1/|k2|` (vertical), stored as a discretised lookup curve.
//!
//! In every case the origin lies on the curve, the normal there is `(0, 1)`
//! and arc length grows with `x` near the origin. Closed curves report
//! signed arc lengths in `(-P/2, P/2]` for perimeter `P`.
//!
//! The ellipse is not projected analytically. Projection scans the samples
//! for the nearest one and refines against its two adjacent chords, which
//! bounds the work per query. The result differs from an exact foot point
//! by the chord sagitta, well below a cell radius at the default 360
//! samples.

use emt_common::{GeneralConfig, Vec2};
use log::warn;
use std::f64::consts::PI;

/// Relative tolerance under which two curvatures describe a circle.
const CIRCLE_TOLERANCE: f64 = 1e-9;
/// Chords shorter than this are treated as degenerate.
const MIN_SEGMENT_LENGTH: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub enum BasalGeometry {
    Line,
    Circle(CircleCurve),
    Ellipse(EllipseCurve),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircleCurve {
    center: Vec2,
    radius: f64,
    /// +1 when the centre lies below the origin, -1 when above.
    orientation: f64,
}

/// One entry of the discretised ellipse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSample {
    pub pos: Vec2,
    /// Cumulative arc length from the origin, in `[0, P)`.
    pub arc: f64,
    /// Parametric angle, 0 at the origin.
    pub angle: f64,
    pub normal: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EllipseCurve {
    center: Vec2,
    semi_x: f64,
    semi_y: f64,
    orientation: f64,
    samples: Vec<CurveSample>,
    perimeter: f64,
}

/// Where a point lands on the discretised ellipse.
#[derive(Debug, Clone, Copy)]
struct Location {
    point: Vec2,
    /// Nearest sample found by the linear scan.
    nearest: usize,
    /// Start sample of the chord holding `point`.
    segment: usize,
    /// Position along that chord, in `[0, 1]`.
    t: f64,
}

impl BasalGeometry {
    pub fn from_config(general: &GeneralConfig) -> Self {
        Self::new(general.curvature_1, general.curvature_2, general.basal_discretization)
    }

    pub fn new(k1: f64, k2: f64, n_samples: usize) -> Self {
        if k1 == 0.0 && k2 == 0.0 {
            return BasalGeometry::Line;
        }
        if k1 == 0.0 || k2 == 0.0 {
            warn!(
                "Curvatures ({}, {}) mix flat and curved axes, falling back to a straight membrane.",
                k1, k2
            );
            return BasalGeometry::Line;
        }
        let orientation = if k1 > 0.0 { 1.0 } else { -1.0 };
        let scale = k1.abs().max(k2.abs());
        if (k1.abs() - k2.abs()).abs() <= CIRCLE_TOLERANCE * scale {
            let radius = 1.0 / k1.abs();
            return BasalGeometry::Circle(CircleCurve {
                center: Vec2::new(0.0, -orientation * radius),
                radius,
                orientation,
            });
        }
        BasalGeometry::Ellipse(EllipseCurve::new(1.0 / k1.abs(), 1.0 / k2.abs(), orientation, n_samples))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BasalGeometry::Line => "line",
            BasalGeometry::Circle(_) => "circle",
            BasalGeometry::Ellipse(_) => "ellipse",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, BasalGeometry::Line)
    }

    /// Perimeter of a closed curve, `None` for the line.
    pub fn perimeter(&self) -> Option<f64> {
        match self {
            BasalGeometry::Line => None,
            BasalGeometry::Circle(c) => Some(2.0 * PI * c.radius),
            BasalGeometry::Ellipse(e) => Some(e.perimeter),
        }
    }

    /// Closest point of the curve.
    pub fn project(&self, p: Vec2) -> Vec2 {
        match self {
            BasalGeometry::Line => Vec2::new(p.x, 0.0),
            BasalGeometry::Circle(c) => c.center + (p - c.center).normalize() * c.radius,
            BasalGeometry::Ellipse(e) => e.locate(p).point,
        }
    }

    /// Arc-length coordinate of the projection of `p`.
    ///
    /// For the ellipse this is the arc length of the nearest sample, without
    /// interpolation along the chord.
    pub fn arc_length(&self, p: Vec2) -> f64 {
        match self {
            BasalGeometry::Line => p.x,
            BasalGeometry::Circle(c) => c.arc_length(p),
            BasalGeometry::Ellipse(e) => {
                let loc = e.locate(p);
                e.signed(e.samples[loc.nearest].arc)
            }
        }
    }

    /// Arc length of the projection of `p`, interpolated along the chord on
    /// the ellipse. Used by kinematics where sub-sample motion matters.
    pub fn arc_length_refined(&self, p: Vec2) -> f64 {
        match self {
            BasalGeometry::Ellipse(e) => {
                let loc = e.locate(p);
                let start = e.samples[loc.segment].arc;
                e.signed(start + loc.t * e.segment_length(loc.segment))
            }
            _ => self.arc_length(p),
        }
    }

    pub fn point_at_arc_length(&self, l: f64) -> Vec2 {
        match self {
            BasalGeometry::Line => Vec2::new(l, 0.0),
            BasalGeometry::Circle(c) => c.point_at(l),
            BasalGeometry::Ellipse(e) => e.sample_at(l).0,
        }
    }

    /// Unit normal at the projection of `p`, pointing away from the tissue
    /// side of the membrane (up at the origin).
    pub fn normal(&self, p: Vec2) -> Vec2 {
        match self {
            BasalGeometry::Line => Vec2::UP,
            BasalGeometry::Circle(c) => (p - c.center).normalize() * c.orientation,
            BasalGeometry::Ellipse(e) => {
                let loc = e.locate(p);
                let next = (loc.segment + 1) % e.samples.len();
                e.samples[loc.segment]
                    .normal
                    .lerp(e.samples[next].normal, loc.t)
                    .normalize()
            }
        }
    }

    /// Unit tangent pointing towards increasing arc length.
    pub fn tangent(&self, p: Vec2) -> Vec2 {
        self.normal(p).perp_cw()
    }

    /// Point at arc length `l`, offset by `height` along the normal there.
    pub fn to_cartesian(&self, l: f64, height: f64) -> Vec2 {
        match self {
            BasalGeometry::Line => Vec2::new(l, height),
            BasalGeometry::Circle(c) => {
                let base = c.point_at(l);
                base + (base - c.center).normalize() * (c.orientation * height)
            }
            BasalGeometry::Ellipse(e) => {
                let (base, normal) = e.sample_at(l);
                base + normal * height
            }
        }
    }

    /// Signed separation `to - from` along the curve. On closed curves the
    /// result is wrapped into `(-P/2, P/2]`.
    pub fn arc_distance(&self, from: f64, to: f64) -> f64 {
        self.wrap(to - from)
    }

    /// Maps an arc length into `(-P/2, P/2]` on closed curves.
    pub fn wrap(&self, l: f64) -> f64 {
        match self.perimeter() {
            Some(perimeter) => wrap_signed(l, perimeter),
            None => l,
        }
    }
}

fn wrap_signed(l: f64, perimeter: f64) -> f64 {
    let w = l.rem_euclid(perimeter);
    if w > 0.5 * perimeter {
        w - perimeter
    } else {
        w
    }
}

impl CircleCurve {
    fn arc_length(&self, p: Vec2) -> f64 {
        let rel = p - self.center;
        if rel.length_squared() < MIN_SEGMENT_LENGTH * MIN_SEGMENT_LENGTH {
            return 0.0;
        }
        self.radius * rel.x.atan2(self.orientation * rel.y)
    }

    fn point_at(&self, l: f64) -> Vec2 {
        let phi = l / self.radius;
        self.center + Vec2::new(phi.sin(), self.orientation * phi.cos()) * self.radius
    }
}

impl EllipseCurve {
    fn new(semi_x: f64, semi_y: f64, orientation: f64, n_samples: usize) -> Self {
        let n = n_samples.max(8);
        let center = Vec2::new(0.0, -orientation * semi_y);
        let mut samples: Vec<CurveSample> = Vec::with_capacity(n);
        let mut arc = 0.0;
        let mut degenerate = 0usize;

        for i in 0..n {
            let angle = 2.0 * PI * i as f64 / n as f64;
            let rel = Vec2::new(semi_x * angle.sin(), orientation * semi_y * angle.cos());
            let pos = center + rel;
            if let Some(prev) = samples.last() {
                let seg = pos.distance(prev.pos);
                if seg < MIN_SEGMENT_LENGTH {
                    degenerate += 1;
                } else {
                    arc += seg;
                }
            }
            // gradient of x^2/a^2 + y^2/b^2
            let gradient = Vec2::new(rel.x / (semi_x * semi_x), rel.y / (semi_y * semi_y));
            samples.push(CurveSample {
                pos,
                arc,
                angle,
                normal: gradient.normalize_or_zero() * orientation,
            });
        }
        let closing = samples[n - 1].pos.distance(samples[0].pos);
        let perimeter = arc + closing;
        if degenerate > 0 {
            warn!("Ellipse discretisation produced {} degenerate chords.", degenerate);
        }

        Self { center, semi_x, semi_y, orientation, samples, perimeter }
    }

    pub fn semi_axes(&self) -> (f64, f64) {
        (self.semi_x, self.semi_y)
    }

    pub fn samples(&self) -> &[CurveSample] {
        &self.samples
    }

    fn signed(&self, arc: f64) -> f64 {
        wrap_signed(arc, self.perimeter)
    }

    fn segment_length(&self, i: usize) -> f64 {
        let next = i + 1;
        if next < self.samples.len() {
            self.samples[next].arc - self.samples[i].arc
        } else {
            self.perimeter - self.samples[i].arc
        }
    }

    fn locate(&self, p: Vec2) -> Location {
        let n = self.samples.len();
        let mut nearest = 0;
        let mut best = f64::INFINITY;
        for (i, s) in self.samples.iter().enumerate() {
            let d = s.pos.distance_squared(p);
            if d < best {
                best = d;
                nearest = i;
            }
        }

        let prev = (nearest + n - 1) % n;
        let (before, t_before) = project_on_chord(p, self.samples[prev].pos, self.samples[nearest].pos);
        let (after, t_after) = project_on_chord(p, self.samples[nearest].pos, self.samples[(nearest + 1) % n].pos);

        let (d_before, d_after) = (before.distance_squared(p), after.distance_squared(p));
        // symmetric feet on either side of a sample: the sample itself is the foot
        if (d_before - d_after).abs() <= 1e-9 * d_before.max(d_after) {
            return Location { point: self.samples[nearest].pos, nearest, segment: nearest, t: 0.0 };
        }
        if d_before < d_after {
            Location { point: before, nearest, segment: prev, t: t_before }
        } else {
            Location { point: after, nearest, segment: nearest, t: t_after }
        }
    }

    /// Position and normal at arc length `l`, wrapped onto the perimeter.
    fn sample_at(&self, l: f64) -> (Vec2, Vec2) {
        let n = self.samples.len();
        let w = l.rem_euclid(self.perimeter);
        let j = self.samples.partition_point(|s| s.arc <= w).saturating_sub(1);
        let next = (j + 1) % n;
        let len = self.segment_length(j);
        let t = if len > MIN_SEGMENT_LENGTH { ((w - self.samples[j].arc) / len).clamp(0.0, 1.0) } else { 0.0 };
        let a = &self.samples[j];
        let b = &self.samples[next];
        (a.pos.lerp(b.pos, t), a.normal.lerp(b.normal, t).normalize())
    }
}

/// Closest point on the chord `a..b` and its parameter in `[0, 1]`.
fn project_on_chord(p: Vec2, a: Vec2, b: Vec2) -> (Vec2, f64) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < MIN_SEGMENT_LENGTH * MIN_SEGMENT_LENGTH {
        return (a, 0.0);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab * t, t)
}

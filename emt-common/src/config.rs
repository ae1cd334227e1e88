use crate::error::{ConfigError, ConfigResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// A `[min, max]` interval sampled uniformly. Either bound may be `inf`,
/// which marks an event that never fires.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(transparent)]
pub struct SampleRange([f64; 2]);

impl SampleRange {
    pub const NEVER: SampleRange = SampleRange([f64::INFINITY, f64::INFINITY]);

    pub const fn new(min: f64, max: f64) -> Self {
        SampleRange([min, max])
    }

    pub fn min(&self) -> f64 {
        self.0[0]
    }

    pub fn max(&self) -> f64 {
        self.0[1]
    }

    fn validate(&self, field: &str, allow_infinite: bool) -> ConfigResult<()> {
        let (min, max) = (self.min(), self.max());
        if min.is_nan() || max.is_nan() {
            return Err(ConfigError::invalid(field, "NaN bound"));
        }
        if !allow_infinite && (!min.is_finite() || !max.is_finite()) {
            return Err(ConfigError::invalid(field, "bounds must be finite"));
        }
        if min < 0.0 {
            return Err(ConfigError::invalid(field, "bounds must be non-negative"));
        }
        if min > max {
            return Err(ConfigError::InvertedRange { field: field.to_string(), min, max });
        }
        Ok(())
    }
}

/// Global settings of one simulation run.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Simulated end time.
    pub t_end: f64,
    /// Length of one full step.
    pub dt: f64,
    /// Number of force/constraint substeps per full step.
    pub n_substeps: u32,
    /// Seed text; numeric seeds are given as their decimal text.
    pub random_seed: String,
    /// Horizontal curvature of the basal membrane (1 / semi-axis).
    pub curvature_1: f64,
    /// Vertical curvature of the basal membrane (1 / semi-axis).
    pub curvature_2: f64,
    pub n_init: usize,
    /// Size of the contiguous middle block of EMT cells.
    pub n_emt: usize,
    /// Arc-length width of the initial placement band, centred on 0.
    pub w_init: f64,
    /// Height of the initial placement band above the membrane.
    pub h_init: f64,
    /// Drag coefficient, `dx = dt * F / mu`.
    pub mu: f64,
    /// Simulated time between recorded snapshots, 0 disables recording.
    pub snapshot_interval: f64,
    /// Number of samples used to discretise an elliptic membrane.
    pub basal_discretization: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            t_end: 48.0,
            dt: 0.1,
            n_substeps: 4,
            random_seed: "0".to_string(),
            curvature_1: 0.0,
            curvature_2: 0.0,
            n_init: 30,
            n_emt: 4,
            w_init: 30.0,
            h_init: 2.0,
            mu: 1.0,
            snapshot_interval: 1.0,
            basal_discretization: 360,
        }
    }
}

/// Properties shared by every cell regardless of type.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CellPropConfig {
    /// Soft (repulsive) nucleus radius.
    pub r_soft: f64,
    /// Hard (non-penetrable) nucleus radius.
    pub r_hard: f64,
    /// Soft-sphere repulsion stiffness.
    pub k_rep: f64,
    /// Initial offset of the apical point along the membrane normal.
    pub cell_height: f64,
    /// Isotropic diffusion coefficient of the nucleus.
    pub diffusion: f64,
    /// Maximum arc-length separation of linked basal points.
    pub max_basal_junction_dist: f64,
    /// Maximum of `eta_a + eta_b`.
    pub max_cytoskeleton_length: f64,
    /// Mobility of the basal point relative to the nucleus.
    pub basal_damping_ratio: f64,
    /// Relaxation rate of the cytoskeleton rest lengths.
    pub k_cytos: f64,
}

impl Default for CellPropConfig {
    fn default() -> Self {
        CellPropConfig {
            r_soft: 0.5,
            r_hard: 0.3,
            k_rep: 10.0,
            cell_height: 3.0,
            diffusion: 0.01,
            max_basal_junction_dist: 2.0,
            max_cytoskeleton_length: 4.0,
            basal_damping_ratio: 0.5,
            k_cytos: 1.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    /// Basal point slides along the membrane in a direction picked at onset.
    Directed,
    /// Basal point chases the projection of its own nucleus.
    FollowNucleus,
}

/// Mechanical and event parameters of one cell type.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CellTypeParams {
    pub k_apical_junction: f64,
    pub k_apical: f64,
    pub k_basal: f64,
    pub k_straightness: f64,
    /// Range of the time between birth and division.
    pub lifespan: SampleRange,
    pub g2_duration: f64,
    pub mitosis_duration: f64,
    /// Interkinetic nuclear migration: release the basal spring in G2 and
    /// pull the nucleus apically during mitosis.
    pub inm: bool,
    /// Delay until apical adhesion is lost.
    pub time_a: SampleRange,
    /// Delay until basal adhesion is lost.
    pub time_b: SampleRange,
    /// Delay until straightness is lost.
    pub time_s: SampleRange,
    /// Delay until the cell may start running.
    pub time_p: SampleRange,
    /// Probability, sampled at birth, that the cell runs at `time_p`.
    pub prob_running: f64,
    pub running_mode: RunningMode,
    pub running_speed: f64,
    /// Probability that a dividing cell resets instead of splitting.
    pub prob_out_div: f64,
    /// Each adhesion-loss timer is disabled with fixed probability.
    pub hetero: bool,
}

impl CellTypeParams {
    pub fn control() -> Self {
        CellTypeParams {
            k_apical_junction: 0.1,
            k_apical: 2.0,
            k_basal: 2.0,
            k_straightness: 1.0,
            lifespan: SampleRange::new(12.0, 24.0),
            g2_duration: 2.0,
            mitosis_duration: 0.5,
            inm: true,
            time_a: SampleRange::NEVER,
            time_b: SampleRange::NEVER,
            time_s: SampleRange::NEVER,
            time_p: SampleRange::NEVER,
            prob_running: 0.0,
            running_mode: RunningMode::Directed,
            running_speed: 0.0,
            prob_out_div: 0.0,
            hetero: false,
        }
    }

    pub fn emt() -> Self {
        CellTypeParams {
            time_a: SampleRange::new(6.0, 12.0),
            time_b: SampleRange::new(12.0, 18.0),
            time_s: SampleRange::new(6.0, 12.0),
            time_p: SampleRange::new(12.0, 18.0),
            prob_running: 0.5,
            running_speed: 0.5,
            ..CellTypeParams::control()
        }
    }

    fn validate(&self, prefix: &str) -> ConfigResult<()> {
        let stiffnesses = [
            ("k_apical_junction", self.k_apical_junction),
            ("k_apical", self.k_apical),
            ("k_basal", self.k_basal),
            ("k_straightness", self.k_straightness),
            ("g2_duration", self.g2_duration),
            ("mitosis_duration", self.mitosis_duration),
            ("running_speed", self.running_speed),
        ];
        for (name, value) in stiffnesses {
            non_negative(&format!("{prefix}.{name}"), value)?;
        }
        self.lifespan.validate(&format!("{prefix}.lifespan"), false)?;
        if self.lifespan.min() <= 0.0 {
            return Err(ConfigError::invalid(format!("{prefix}.lifespan"), "lifespan must be positive"));
        }
        self.time_a.validate(&format!("{prefix}.time_a"), true)?;
        self.time_b.validate(&format!("{prefix}.time_b"), true)?;
        self.time_s.validate(&format!("{prefix}.time_s"), true)?;
        self.time_p.validate(&format!("{prefix}.time_p"), true)?;
        probability(&format!("{prefix}.prob_running"), self.prob_running)?;
        probability(&format!("{prefix}.prob_out_div"), self.prob_out_div)?;
        Ok(())
    }
}

/// Per-type parameters, resolved into fixed fields at load time. A partial
/// table only replaces the fields it names; the rest keep that type's
/// defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CellTypesConfig {
    #[serde(deserialize_with = "control_over_defaults")]
    pub control: CellTypeParams,
    #[serde(deserialize_with = "emt_over_defaults")]
    pub emt: CellTypeParams,
}

fn control_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<CellTypeParams, D::Error> {
    merge_over(d, CellTypeParams::control())
}

fn emt_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<CellTypeParams, D::Error> {
    merge_over(d, CellTypeParams::emt())
}

fn merge_over<'de, D: Deserializer<'de>>(d: D, base: CellTypeParams) -> Result<CellTypeParams, D::Error> {
    let partial = toml::Table::deserialize(d)?;
    let toml::Value::Table(mut merged) = toml::Value::try_from(base).map_err(D::Error::custom)? else {
        return Err(D::Error::custom("cell type defaults are not a table"));
    };
    merged.extend(partial);
    toml::Value::Table(merged).try_into().map_err(D::Error::custom)
}

impl Default for CellTypesConfig {
    fn default() -> Self {
        CellTypesConfig { control: CellTypeParams::control(), emt: CellTypeParams::emt() }
    }
}

/// Full parameter set consumed by the engine.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Parameters {
    pub general: GeneralConfig,
    pub cell_prop: CellPropConfig,
    pub cell_types: CellTypesConfig,
}

impl Parameters {
    /// Loads and validates parameters from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path_ref = path.as_ref();
        let display = path_ref.display().to_string();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        let params: Parameters = toml::from_str(&config_str)
            .map_err(|source| ConfigError::Parse { path: display, source })?;

        params.validate()?;
        Ok(params)
    }

    /// Rejects values the engine cannot run with. The engine itself does
    /// not re-check anything per step.
    pub fn validate(&self) -> ConfigResult<()> {
        let g = &self.general;
        positive("general.dt", g.dt)?;
        positive("general.mu", g.mu)?;
        non_negative("general.t_end", g.t_end)?;
        non_negative("general.w_init", g.w_init)?;
        non_negative("general.h_init", g.h_init)?;
        non_negative("general.snapshot_interval", g.snapshot_interval)?;
        if g.n_substeps == 0 {
            return Err(ConfigError::invalid("general.n_substeps", "must be at least 1"));
        }
        if g.n_emt > g.n_init {
            return Err(ConfigError::invalid(
                "general.n_emt",
                format!("{} EMT cells requested but only {} cells in total", g.n_emt, g.n_init),
            ));
        }
        if g.basal_discretization < 8 {
            return Err(ConfigError::invalid("general.basal_discretization", "needs at least 8 samples"));
        }
        validate_curvatures(g.curvature_1, g.curvature_2)?;

        let p = &self.cell_prop;
        positive("cell_prop.r_soft", p.r_soft)?;
        non_negative("cell_prop.r_hard", p.r_hard)?;
        if p.r_hard > p.r_soft {
            return Err(ConfigError::invalid("cell_prop.r_hard", "must not exceed r_soft"));
        }
        non_negative("cell_prop.k_rep", p.k_rep)?;
        non_negative("cell_prop.cell_height", p.cell_height)?;
        non_negative("cell_prop.diffusion", p.diffusion)?;
        positive("cell_prop.max_basal_junction_dist", p.max_basal_junction_dist)?;
        positive("cell_prop.max_cytoskeleton_length", p.max_cytoskeleton_length)?;
        non_negative("cell_prop.basal_damping_ratio", p.basal_damping_ratio)?;
        non_negative("cell_prop.k_cytos", p.k_cytos)?;

        self.cell_types.control.validate("cell_types.control")?;
        self.cell_types.emt.validate("cell_types.emt")?;
        Ok(())
    }

    /// Returns a copy with each `(path, value)` applied, e.g.
    /// `("cell_types.emt.k_apical", 3.0)` or `("cell_types.emt.time_a.1", 8.0)`.
    /// Integer fields are rounded, booleans take `value != 0`.
    pub fn with_overrides<S: AsRef<str>>(&self, overrides: &[(S, f64)]) -> ConfigResult<Self> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let mut tree = toml::Value::try_from(self)
            .map_err(|e| ConfigError::invalid("parameters", e.to_string()))?;
        for (path, value) in overrides {
            set_path(&mut tree, path.as_ref(), *value)?;
        }
        let params: Parameters = tree
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::invalid("parameters", e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

fn set_path(tree: &mut toml::Value, path: &str, value: f64) -> ConfigResult<()> {
    let unknown = || ConfigError::UnknownPath(path.to_string());
    let mut node = tree;
    for key in path.split('.') {
        node = match node {
            toml::Value::Table(table) => table.get_mut(key).ok_or_else(unknown)?,
            toml::Value::Array(items) => {
                let idx: usize = key.parse().map_err(|_| unknown())?;
                items.get_mut(idx).ok_or_else(unknown)?
            }
            _ => return Err(unknown()),
        };
    }
    *node = match node {
        toml::Value::Float(_) => toml::Value::Float(value),
        toml::Value::Integer(_) => {
            if value < 0.0 {
                return Err(ConfigError::invalid(path, "integer parameter must be non-negative"));
            }
            toml::Value::Integer(value.round() as i64)
        }
        toml::Value::Boolean(_) => toml::Value::Boolean(value != 0.0),
        _ => return Err(unknown()),
    };
    Ok(())
}

fn validate_curvatures(k1: f64, k2: f64) -> ConfigResult<()> {
    if !k1.is_finite() || !k2.is_finite() {
        return Err(ConfigError::invalid("general.curvature", "curvatures must be finite"));
    }
    let flat = (k1 == 0.0, k2 == 0.0);
    match flat {
        (true, true) => Ok(()),
        (false, false) if k1.signum() == k2.signum() => Ok(()),
        (false, false) => Err(ConfigError::invalid(
            "general.curvature",
            format!("curvatures {k1} and {k2} must have the same sign"),
        )),
        _ => Err(ConfigError::invalid(
            "general.curvature",
            "curvatures must be both zero or both non-zero",
        )),
    }
}

fn positive(field: &str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive and finite, got {value}")))
    }
}

fn non_negative(field: &str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be non-negative and finite, got {value}")))
    }
}

fn probability(field: &str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Parameters::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let text = r#"
            [general]
            n_init = 12
            random_seed = "abc"

            [cell_types.emt]
            time_a = [1.0, 2.0]
            time_b = [inf, inf]
        "#;
        let params: Parameters = toml::from_str(text).unwrap();
        assert_eq!(params.general.n_init, 12);
        assert_eq!(params.general.dt, GeneralConfig::default().dt);
        assert_eq!(params.cell_types.emt.time_a, SampleRange::new(1.0, 2.0));
        assert!(params.cell_types.emt.time_b.min().is_infinite());
        // fields the table leaves out keep the EMT defaults
        assert_eq!(params.cell_types.emt.time_p, CellTypeParams::emt().time_p);
        assert_eq!(params.cell_types.control, CellTypeParams::control());
        params.validate().unwrap();
    }

    #[test]
    fn rejects_malformed_values() {
        let mut params = Parameters::default();
        params.cell_prop.r_soft = -1.0;
        assert!(params.validate().is_err());

        let mut params = Parameters::default();
        params.cell_types.emt.lifespan = SampleRange::new(10.0, 5.0);
        assert!(matches!(params.validate(), Err(ConfigError::InvertedRange { .. })));

        let mut params = Parameters::default();
        params.general.n_emt = params.general.n_init + 1;
        assert!(params.validate().is_err());

        let mut params = Parameters::default();
        params.general.curvature_1 = 0.1;
        assert!(params.validate().is_err());
    }

    #[test]
    fn overrides_resolve_typed_fields() {
        let base = Parameters::default();
        let params = base
            .with_overrides(&[
                ("cell_types.emt.k_apical", 3.5),
                ("general.n_init", 11.6),
                ("cell_types.emt.time_p.1", 40.0),
                ("cell_types.emt.hetero", 1.0),
            ])
            .unwrap();
        assert_eq!(params.cell_types.emt.k_apical, 3.5);
        assert_eq!(params.general.n_init, 12);
        assert_eq!(params.cell_types.emt.time_p.max(), 40.0);
        assert_eq!(params.cell_types.emt.time_p.min(), CellTypeParams::emt().time_p.min());
        assert!(params.cell_types.emt.hetero);
        // untouched infinite timers survive the round trip
        assert!(params.cell_types.control.time_a.min().is_infinite());

        // a finite bound under a never-firing timer inverts the range
        assert!(matches!(
            base.with_overrides(&[("cell_types.control.time_p.1", 40.0)]),
            Err(ConfigError::InvertedRange { .. })
        ));
        assert!(matches!(
            base.with_overrides(&[("general.nope", 1.0)]),
            Err(ConfigError::UnknownPath(_))
        ));
        assert!(base.with_overrides(&[("general.random_seed", 1.0)]).is_err());
    }
}

//! YAML run descriptions.
//!
//! A run file names the box (and optionally a partner box for transfer
//! moves), the species with their shapes and reservoir activities, the
//! implicit depletants, the move mix and the starting configuration.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use shapes::{
    AnyShape, ConvexPolygon, Dimensions, ShapeUnion, Sphere, Spheropolygon, UnionMember,
};

use crate::depletant::{DepletantSpecies, FreeVolumeEstimator};
use crate::error::MuvtError;
use crate::gibbs::{ChannelPartner, GibbsDriver};
use crate::proposer::{MoveWeights, TypeSelection};
use crate::simbox::SimBox;
use crate::species::{Species, Thermal};
use crate::state::{BoxState, Particle, TypeId};
use crate::updater::UpdaterMuVT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_sweeps")]
    pub sweeps: u64,
    #[serde(default = "default_attempts_per_sweep")]
    pub attempts_per_sweep: u64,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(rename = "box")]
    pub simbox: BoxConfig,
    /// Enables transfer moves between the two boxes
    #[serde(default)]
    pub partner_box: Option<BoxConfig>,
    pub species: Vec<SpeciesConfig>,
    #[serde(default)]
    pub depletants: Vec<DepletantConfig>,
    #[serde(default)]
    pub moves: MoveWeights,
    #[serde(default)]
    pub type_selection: TypeSelection,
    #[serde(default)]
    pub initial: Vec<InitialParticle>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub scan: Option<ScanConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalConfig {
    #[serde(rename = "kT", default = "default_kt")]
    pub kt: f64,
    #[serde(default = "default_thermal_wavelength")]
    pub thermal_wavelength: f64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            kt: default_kt(),
            thermal_wavelength: default_thermal_wavelength(),
        }
    }
}

impl From<&ThermalConfig> for Thermal {
    fn from(config: &ThermalConfig) -> Self {
        Thermal {
            kt: config.kt,
            thermal_wavelength: config.thermal_wavelength,
        }
    }
}

/// Simulation cell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoxConfig {
    #[serde(rename = "cubic")]
    Cubic { length: f64 },
    #[serde(rename = "orthorhombic")]
    Orthorhombic { lengths: [f64; 3] },
    /// 2D box in the xy plane
    #[serde(rename = "rectangle")]
    Rectangle { lx: f64, ly: f64 },
    /// General cell given by its three cell vectors
    #[serde(rename = "triclinic")]
    Triclinic {
        vectors: [[f64; 3]; 3],
        #[serde(default = "default_dimensions")]
        dimensions: u8,
    },
}

impl BoxConfig {
    pub fn build(&self) -> Result<SimBox, MuvtError> {
        match self {
            BoxConfig::Cubic { length } => SimBox::cubic(*length),
            BoxConfig::Orthorhombic { lengths } => SimBox::orthorhombic(Vector3::from(*lengths)),
            BoxConfig::Rectangle { lx, ly } => SimBox::rectangle(*lx, *ly),
            BoxConfig::Triclinic {
                vectors,
                dimensions,
            } => {
                let dimensions = match dimensions {
                    2 => Dimensions::Two,
                    3 => Dimensions::Three,
                    other => {
                        return Err(MuvtError::InvalidConfig(format!(
                            "Box dimensions must be 2 or 3, got {other}"
                        )))
                    }
                };
                let lattice = Matrix3::from_columns(&[
                    Vector3::from(vectors[0]),
                    Vector3::from(vectors[1]),
                    Vector3::from(vectors[2]),
                ]);
                SimBox::from_lattice(lattice, dimensions)
            }
        }
    }
}

/// Particle shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShapeConfig {
    #[serde(rename = "sphere")]
    Sphere { diameter: f64 },
    #[serde(rename = "disk")]
    Disk { diameter: f64 },
    /// Counter-clockwise vertices about the particle center
    #[serde(rename = "convex_polygon")]
    ConvexPolygon { vertices: Vec<[f64; 2]> },
    #[serde(rename = "spheropolygon")]
    Spheropolygon {
        vertices: Vec<[f64; 2]>,
        sweep_radius: f64,
    },
    /// Rigid union of member shapes
    #[serde(rename = "union")]
    Union { members: Vec<UnionMemberConfig> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionMemberConfig {
    pub shape: ShapeConfig,
    pub position: [f64; 3],
    #[serde(default)]
    pub orientation: Option<[f64; 4]>,
}

impl ShapeConfig {
    pub fn build(&self) -> Result<AnyShape, MuvtError> {
        let vertices = |v: &[[f64; 2]]| -> Vec<Vector2<f64>> {
            v.iter().map(|&[x, y]| Vector2::new(x, y)).collect()
        };
        let shape: AnyShape = match self {
            ShapeConfig::Sphere { diameter } => AnyShape::Sphere(Sphere::new(*diameter)?),
            ShapeConfig::Disk { diameter } => AnyShape::Spheropolygon(Spheropolygon::disk(*diameter)?),
            ShapeConfig::ConvexPolygon { vertices: v } => {
                AnyShape::ConvexPolygon(ConvexPolygon::new(vertices(v))?)
            }
            ShapeConfig::Spheropolygon {
                vertices: v,
                sweep_radius,
            } => AnyShape::Spheropolygon(Spheropolygon::new(vertices(v), *sweep_radius)?),
            ShapeConfig::Union { members } => {
                let members = members
                    .iter()
                    .map(|m| {
                        Ok(UnionMember::new(
                            m.shape.build()?,
                            Vector3::from(m.position),
                            orientation(m.orientation)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, MuvtError>>()?;
                AnyShape::Union(ShapeUnion::new(members)?)
            }
        };
        Ok(shape)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    pub shape: ShapeConfig,
    /// Reservoir fugacity; give either this or `chemical_potential`
    #[serde(default)]
    pub fugacity: Option<f64>,
    #[serde(default)]
    pub chemical_potential: Option<f64>,
    #[serde(default)]
    pub ignore_overlaps: bool,
    #[serde(default)]
    pub ignore_statistics: bool,
}

/// Implicit depletant: a species that is never inserted, only sampled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepletantConfig {
    pub species: String,
    pub fugacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialParticle {
    pub species: String,
    pub position: [f64; 3],
    /// Quaternion as [w, x, y, z]
    #[serde(default)]
    pub orientation: Option<[f64; 4]>,
    /// Place the particle in the partner box
    #[serde(default)]
    pub partner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    /// Samples for the depletant free-volume diagnostic, 0 disables it
    #[serde(default)]
    pub free_volume_samples: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_interval: default_report_interval(),
            free_volume_samples: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub species: String,
    pub fugacities: Vec<f64>,
    #[serde(default)]
    pub equilibration: u64,
}

fn default_seed() -> u64 {
    12345
}

fn default_sweeps() -> u64 {
    1000
}

fn default_attempts_per_sweep() -> u64 {
    100
}

fn default_kt() -> f64 {
    1.0
}

fn default_thermal_wavelength() -> f64 {
    1.0
}

fn default_dimensions() -> u8 {
    3
}

fn default_report_interval() -> u64 {
    100
}

fn orientation(q: Option<[f64; 4]>) -> Result<UnitQuaternion<f64>, MuvtError> {
    match q {
        None => Ok(UnitQuaternion::identity()),
        Some([w, x, y, z]) => {
            let q = Quaternion::new(w, x, y, z);
            if !q.coords.iter().all(|c| c.is_finite()) || q.norm() < 1e-12 {
                return Err(MuvtError::InvalidConfig(format!(
                    "Orientation {:?} is not a valid quaternion",
                    [w, x, y, z]
                )));
            }
            Ok(UnitQuaternion::from_quaternion(q))
        }
    }
}

impl RunConfig {
    /// Parse a run description and validate it.
    pub fn from_yaml(content: &str) -> Result<Self, MuvtError> {
        let config: RunConfig = serde_yml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MuvtError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MuvtError> {
        let content = serde_yml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MuvtError> {
        let invalid = |msg: String| Err(MuvtError::InvalidConfig(msg));

        if self.attempts_per_sweep == 0 {
            return invalid("attempts_per_sweep must be positive".to_string());
        }
        if !(self.thermal.kt.is_finite() && self.thermal.kt > 0.0) {
            return invalid(format!("kT must be positive, got {}", self.thermal.kt));
        }
        if !(self.thermal.thermal_wavelength.is_finite() && self.thermal.thermal_wavelength > 0.0) {
            return invalid(format!(
                "thermal_wavelength must be positive, got {}",
                self.thermal.thermal_wavelength
            ));
        }
        if self.output.report_interval == 0 {
            return invalid("report_interval must be positive".to_string());
        }

        if self.species.is_empty() {
            return invalid("At least one species is required".to_string());
        }
        let mut names = HashSet::new();
        for species in &self.species {
            if !names.insert(species.name.as_str()) {
                return invalid(format!("Duplicate species name '{}'", species.name));
            }
            match (species.fugacity, species.chemical_potential) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return invalid(format!(
                        "Species '{}' needs exactly one of fugacity and chemical_potential",
                        species.name
                    ))
                }
            }
        }

        let mut depleted = HashSet::new();
        for depletant in &self.depletants {
            self.require_species(&depletant.species)?;
            if !depleted.insert(depletant.species.as_str()) {
                return invalid(format!("Depletant '{}' listed twice", depletant.species));
            }
            if !(depletant.fugacity.is_finite() && depletant.fugacity >= 0.0) {
                return invalid(format!(
                    "Depletant '{}' fugacity must be finite and non-negative",
                    depletant.species
                ));
            }
        }
        if self.species.iter().all(|s| depleted.contains(s.name.as_str())) {
            return invalid("Every species is a depletant; nothing can be inserted".to_string());
        }

        self.moves.validate(self.partner_box.is_some())?;

        for particle in &self.initial {
            self.require_species(&particle.species)?;
            if particle.partner && self.partner_box.is_none() {
                return invalid(format!(
                    "Initial particle of '{}' is placed in a partner box that does not exist",
                    particle.species
                ));
            }
            if depleted.contains(particle.species.as_str()) {
                return invalid(format!(
                    "Depletant species '{}' cannot have explicit particles",
                    particle.species
                ));
            }
        }

        if let Some(scan) = &self.scan {
            self.require_species(&scan.species)?;
            if self.partner_box.is_some() {
                return invalid("A fugacity scan runs single boxes only".to_string());
            }
            if scan.fugacities.is_empty() {
                return invalid("A scan needs at least one fugacity".to_string());
            }
            if scan.fugacities.iter().any(|z| !(z.is_finite() && *z >= 0.0)) {
                return invalid("Scan fugacities must be finite and non-negative".to_string());
            }
        }
        Ok(())
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.species.iter().position(|s| s.name == name)
    }

    fn require_species(&self, name: &str) -> Result<TypeId, MuvtError> {
        self.type_id(name)
            .ok_or_else(|| MuvtError::InvalidConfig(format!("Unknown species '{name}'")))
    }

    pub fn build_species(&self) -> Result<Vec<Species<AnyShape>>, MuvtError> {
        let thermal = Thermal::from(&self.thermal);
        self.species
            .iter()
            .map(|config| {
                let shape = config.shape.build().map_err(|e| match e {
                    MuvtError::Shape { source } => MuvtError::MalformedShape {
                        species: config.name.clone(),
                        reason: source.to_string(),
                    },
                    other => other,
                })?;
                let species = match (config.fugacity, config.chemical_potential) {
                    (Some(z), _) => Species::new(config.name.clone(), shape, z),
                    (None, Some(mu)) => {
                        Species::from_chemical_potential(config.name.clone(), shape, mu, &thermal)
                    }
                    (None, None) => {
                        return Err(MuvtError::InvalidConfig(format!(
                            "Species '{}' has no activity",
                            config.name
                        )))
                    }
                };
                Ok(species
                    .ignoring_overlaps(config.ignore_overlaps)
                    .ignoring_statistics(config.ignore_statistics))
            })
            .collect()
    }

    fn movable_types(&self) -> Vec<TypeId> {
        (0..self.species.len())
            .filter(|&t| !self.depletants.iter().any(|d| d.species == self.species[t].name))
            .collect()
    }

    fn build_estimator(&self, species: &[Species<AnyShape>]) -> Result<FreeVolumeEstimator<AnyShape>, MuvtError> {
        let depletants = self
            .depletants
            .iter()
            .map(|d| {
                let type_id = self.require_species(&d.species)?;
                DepletantSpecies::from_species(&species[type_id], d.fugacity)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FreeVolumeEstimator::new(depletants))
    }

    /// Build the updater for the main box, or for the partner box when
    /// `partner` is set.
    pub fn build_updater(&self, partner: bool) -> Result<UpdaterMuVT<AnyShape>, MuvtError> {
        let box_config = if partner {
            self.partner_box.as_ref().ok_or_else(|| {
                MuvtError::InvalidConfig("No partner_box in the run description".to_string())
            })?
        } else {
            &self.simbox
        };
        let species = self.build_species()?;
        let estimator = self.build_estimator(&species)?;
        let state = BoxState::new(box_config.build()?, species)?;
        let seed = if partner {
            self.seed.wrapping_add(0x9E37_79B9)
        } else {
            self.seed
        };

        let mut updater = UpdaterMuVT::new(state, estimator, seed)
            .with_type_selection(self.type_selection)
            .with_attempts_per_sweep(self.attempts_per_sweep)?
            .with_movable_types(self.movable_types())?;
        if self.partner_box.is_none() {
            updater = updater.with_weights(self.moves)?;
        }

        let initial = self
            .initial
            .iter()
            .filter(|p| p.partner == partner)
            .map(|p| {
                Ok(Particle::new(
                    self.require_species(&p.species)?,
                    Vector3::from(p.position),
                    orientation(p.orientation)?,
                ))
            })
            .collect::<Result<Vec<_>, MuvtError>>()?;
        updater.insert_initial(initial)?;
        Ok(updater)
    }

    /// Two-box driver: the main box is served in-process, the partner box
    /// from its own thread.
    pub fn build_driver(&self) -> Result<GibbsDriver, MuvtError> {
        let first = self.build_updater(false)?;
        let second = ChannelPartner::spawn(self.build_updater(true)?)?;
        let driver = GibbsDriver::new(Box::new(first), Box::new(second), self.seed)?
            .with_weights(self.moves)?
            .with_type_selection(self.type_selection)
            .with_attempts_per_sweep(self.attempts_per_sweep)?;
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SPHERES: &str = r#"
seed: 7
sweeps: 50
attempts_per_sweep: 20
box:
  type: cubic
  length: 10.0
species:
  - name: colloid
    shape:
      type: sphere
      diameter: 1.0
    fugacity: 0.05
  - name: polymer
    shape:
      type: sphere
      diameter: 0.5
    fugacity: 0.0
depletants:
  - species: polymer
    fugacity: 0.2
initial:
  - species: colloid
    position: [1.0, 1.0, 1.0]
  - species: colloid
    position: [5.0, 5.0, 5.0]
"#;

    #[test]
    fn test_parse_and_build() {
        let config = RunConfig::from_yaml(SPHERES).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.output.report_interval, 100);
        assert_eq!(config.moves, MoveWeights::default());

        let mut updater = config.build_updater(false).unwrap();
        assert_eq!(updater.state().counts(), vec![2, 0]);
        assert_eq!(updater.estimator().depletants().len(), 1);
        let summaries = updater.type_summaries();
        assert!(summaries[0].movable);
        assert!(!summaries[1].movable);

        updater.run(10).unwrap();
        // depletant species is never inserted
        assert_eq!(updater.state().particle_count(1), 0);
    }

    #[test]
    fn test_chemical_potential_and_2d_shapes() {
        let yaml = r#"
thermal:
  kT: 2.0
  thermal_wavelength: 0.5
box:
  type: rectangle
  lx: 8.0
  ly: 6.0
species:
  - name: square
    chemical_potential: -1.0
    shape:
      type: convex_polygon
      vertices: [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]]
  - name: dimer
    fugacity: 0.1
    shape:
      type: union
      members:
        - shape: {type: disk, diameter: 1.0}
          position: [-0.5, 0.0, 0.0]
        - shape: {type: disk, diameter: 1.0}
          position: [0.5, 0.0, 0.0]
"#;
        let config = RunConfig::from_yaml(yaml).unwrap();
        let species = config.build_species().unwrap();
        assert_relative_eq!(species[0].fugacity, (-0.5f64).exp() / 0.25, epsilon = 1e-12);
        let mut updater = config.build_updater(false).unwrap();
        updater.run(5).unwrap();
    }

    #[test]
    fn test_validation_errors() {
        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.species[0].chemical_potential = Some(1.0);
        assert!(config.validate().is_err());

        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.moves.transfer = 1.0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.depletants[0].species = "solvent".to_string();
        assert!(config.validate().is_err());

        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.initial[0].partner = true;
        assert!(config.validate().is_err());

        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.species[1].name = "colloid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_shape_is_malformed() {
        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.species[0].shape = ShapeConfig::Sphere { diameter: -1.0 };
        assert!(matches!(
            config.build_species(),
            Err(MuvtError::MalformedShape { .. })
        ));
    }

    #[test]
    fn test_initial_overlap_is_reported() {
        let mut config = RunConfig::from_yaml(SPHERES).unwrap();
        config.initial[1].position = [1.5, 1.0, 1.0];
        assert!(matches!(
            config.build_updater(false),
            Err(MuvtError::InitialOverlap { index: 1 })
        ));
    }

    #[test]
    fn test_file_io() {
        let config = RunConfig::from_yaml(SPHERES).unwrap();
        let temp_file = NamedTempFile::new().unwrap();
        config.to_file(temp_file.path()).unwrap();

        let loaded = RunConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.species.len(), 2);
        assert_eq!(loaded.depletants[0].species, "polymer");
        assert_eq!(loaded.initial.len(), 2);
    }

    #[test]
    fn test_gibbs_from_file() {
        let yaml = r#"
attempts_per_sweep: 10
box: {type: cubic, length: 8.0}
partner_box: {type: cubic, length: 8.0}
species:
  - name: A
    fugacity: 1.0
    shape: {type: sphere, diameter: 0.2}
moves: {insertion: 0.0, deletion: 0.0, transfer: 1.0}
initial:
  - {species: A, position: [1.0, 1.0, 1.0]}
  - {species: A, position: [2.0, 1.0, 1.0], partner: true}
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();
        let config = RunConfig::from_file(temp_file.path()).unwrap();

        let mut driver = config.build_driver().unwrap();
        let reports = driver.run(10).unwrap();
        let last = reports.last().unwrap();
        assert_eq!(last.boxes[0].counts[0] + last.boxes[1].counts[0], 2);
    }
}

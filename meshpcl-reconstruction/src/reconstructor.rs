//! Reconstruction strategies and their selection

use crate::greedy_projection::{GreedyProjection, GreedyProjectionConfig};
use crate::poisson::{PoissonConfig, PoissonReconstructor};
use meshpcl_core::{Error, OrientedCloud, PolygonMesh, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Turns an oriented cloud into a surface mesh
pub trait SurfaceReconstructor {
    /// Reconstruct a mesh; a failure never yields a partial mesh
    fn reconstruct(&self, cloud: &OrientedCloud) -> Result<PolygonMesh>;

    /// Short human-readable name of the strategy
    fn name(&self) -> &'static str;
}

impl SurfaceReconstructor for PoissonReconstructor {
    fn reconstruct(&self, cloud: &OrientedCloud) -> Result<PolygonMesh> {
        PoissonReconstructor::reconstruct(self, cloud)
    }

    fn name(&self) -> &'static str {
        StrategyKind::ImplicitPoisson.name()
    }
}

impl SurfaceReconstructor for GreedyProjection {
    fn reconstruct(&self, cloud: &OrientedCloud) -> Result<PolygonMesh> {
        GreedyProjection::reconstruct(self, cloud)
    }

    fn name(&self) -> &'static str {
        StrategyKind::GreedyProjection.name()
    }
}

/// Identifier of a reconstruction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StrategyKind {
    #[default]
    ImplicitPoisson,
    GreedyProjection,
}

impl StrategyKind {
    /// Map the numeric selector of the command line: 1 is Poisson, 2 is greedy projection
    pub fn from_selector(selector: i64) -> Result<Self> {
        match selector {
            1 => Ok(StrategyKind::ImplicitPoisson),
            2 => Ok(StrategyKind::GreedyProjection),
            other => Err(Error::config(format!(
                "unknown reconstruction strategy {} (expected 1 for Poisson or 2 for greedy projection)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::ImplicitPoisson => "implicit-poisson",
            StrategyKind::GreedyProjection => "greedy-projection",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "poisson" | "implicit-poisson" => Ok(StrategyKind::ImplicitPoisson),
            "2" | "gp3" | "greedy" | "greedy-projection" => Ok(StrategyKind::GreedyProjection),
            other => Err(Error::config(format!("unknown reconstruction strategy '{}'", other))),
        }
    }
}

/// The strategy chosen for a run, with its validated configuration
#[derive(Debug)]
pub enum ReconstructionMethod {
    ImplicitPoisson(PoissonReconstructor),
    GreedyProjection(GreedyProjection),
}

impl ReconstructionMethod {
    /// Build the strategy of `kind` from its configuration
    pub fn new(kind: StrategyKind, poisson: &PoissonConfig, greedy: &GreedyProjectionConfig) -> Result<Self> {
        match kind {
            StrategyKind::ImplicitPoisson => Ok(Self::ImplicitPoisson(PoissonReconstructor::new(poisson.clone())?)),
            StrategyKind::GreedyProjection => Ok(Self::GreedyProjection(GreedyProjection::new(greedy.clone())?)),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::ImplicitPoisson(_) => StrategyKind::ImplicitPoisson,
            Self::GreedyProjection(_) => StrategyKind::GreedyProjection,
        }
    }

    /// Smallest cloud the strategy accepts
    pub fn min_points(&self) -> usize {
        match self {
            Self::ImplicitPoisson(_) => crate::poisson::MIN_POISSON_POINTS,
            Self::GreedyProjection(_) => crate::greedy_projection::MIN_GREEDY_POINTS,
        }
    }
}

impl SurfaceReconstructor for ReconstructionMethod {
    fn reconstruct(&self, cloud: &OrientedCloud) -> Result<PolygonMesh> {
        match self {
            Self::ImplicitPoisson(poisson) => poisson.reconstruct(cloud),
            Self::GreedyProjection(greedy) => greedy.reconstruct(cloud),
        }
    }

    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

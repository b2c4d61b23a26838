//! Mapping of declared session features onto semantic roles.
//!
//! Models exporting the canonical output names bind directly. Anything else
//! goes through a prioritized rule table per role; a role's rules are tried
//! in order and the first declared output matching a rule wins. Outputs are
//! claimed exclusively so one tensor never serves two roles.

use std::collections::HashSet;

use splatgen_inference::{FeatureDescriptor, FeatureKind};
use tracing::{debug, info};

use crate::error::SchemaError;

/// Preferred name of the image input.
pub const IMAGE_INPUT: &str = "image";

/// Preferred name of the disparity-factor input.
pub const DISPARITY_INPUT: &str = "disparity_factor";

/// Input edge length used when the image input declares no usable size.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (1536, 1536);

/// Per-point output roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputRole {
    Positions,
    Scales,
    Rotations,
    Colors,
    Opacities,
}

impl OutputRole {
    /// All roles, in heuristic resolution order.
    pub const ALL: [OutputRole; 5] = [
        OutputRole::Rotations,
        OutputRole::Positions,
        OutputRole::Scales,
        OutputRole::Colors,
        OutputRole::Opacities,
    ];

    /// Output name used by models exported with the reference converter.
    pub fn canonical_name(self) -> &'static str {
        match self {
            OutputRole::Positions => "mean_vectors_3d_positions",
            OutputRole::Scales => "singular_values_scales",
            OutputRole::Rotations => "quaternions_rotations",
            OutputRole::Colors => "colors_rgb_linear",
            OutputRole::Opacities => "opacities_alpha_channel",
        }
    }

    fn rules(self) -> &'static [Rule] {
        match self {
            OutputRole::Rotations => ROTATION_RULES,
            OutputRole::Positions => POSITION_RULES,
            OutputRole::Scales => SCALE_RULES,
            OutputRole::Colors => COLOR_RULES,
            OutputRole::Opacities => OPACITY_RULES,
        }
    }
}

/// How the output roles were bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPath {
    /// All canonical names were present.
    Canonical,
    /// Shape and name heuristics.
    Heuristic,
}

/// A single shape/name pattern.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Required rank.
    pub rank: usize,
    /// Required last dimension, if any.
    pub last_dim: Option<usize>,
    /// Name must contain one of these (case-insensitive); empty matches any.
    pub hints: &'static [&'static str],
}

impl Rule {
    const fn new(rank: usize, last_dim: Option<usize>, hints: &'static [&'static str]) -> Self {
        Self {
            rank,
            last_dim,
            hints,
        }
    }

    /// Whether `desc` satisfies this rule.
    pub fn matches(&self, desc: &FeatureDescriptor) -> bool {
        let Some(shape) = &desc.shape else {
            return false;
        };
        if shape.len() != self.rank {
            return false;
        }
        if let Some(last) = self.last_dim {
            if shape.last() != Some(&last) {
                return false;
            }
        }
        if self.hints.is_empty() {
            return true;
        }
        let name = desc.name.to_lowercase();
        self.hints.iter().any(|h| name.contains(h))
    }
}

const ROTATION_RULES: &[Rule] = &[
    Rule::new(3, Some(4), &["rot"]),
    Rule::new(2, Some(4), &["rot"]),
    Rule::new(3, Some(4), &[]),
    Rule::new(2, Some(4), &[]),
];

const POSITION_RULES: &[Rule] = &[Rule::new(3, Some(3), &["pos"]), Rule::new(3, Some(3), &["mean"])];

const SCALE_RULES: &[Rule] = &[
    Rule::new(3, Some(3), &["scale"]),
    Rule::new(3, Some(3), &["singular"]),
];

const COLOR_RULES: &[Rule] = &[Rule::new(3, Some(3), &["color"])];

const OPACITY_RULES: &[Rule] = &[
    Rule::new(2, None, &["opacity", "alpha"]),
    Rule::new(2, None, &[]),
];

/// Last-resort rule for three-component roles left unbound by their hints.
const UNNAMED_VEC3: Rule = Rule::new(3, Some(3), &[]);

/// Resolved mapping of session features to roles.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticSchema {
    pub image_input: FeatureDescriptor,
    pub disparity_input: Option<FeatureDescriptor>,
    pub positions: FeatureDescriptor,
    pub scales: FeatureDescriptor,
    pub rotations: FeatureDescriptor,
    pub colors: FeatureDescriptor,
    pub opacities: FeatureDescriptor,
    pub path: ResolutionPath,
}

impl SemanticSchema {
    /// Descriptor bound to `role`.
    pub fn output(&self, role: OutputRole) -> &FeatureDescriptor {
        match role {
            OutputRole::Positions => &self.positions,
            OutputRole::Scales => &self.scales,
            OutputRole::Rotations => &self.rotations,
            OutputRole::Colors => &self.colors,
            OutputRole::Opacities => &self.opacities,
        }
    }
}

/// Resolves a session's declared features into a [`SemanticSchema`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaResolver;

impl SchemaResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve inputs and outputs. All five output roles must bind.
    pub fn resolve(
        &self,
        inputs: &[FeatureDescriptor],
        outputs: &[FeatureDescriptor],
    ) -> Result<SemanticSchema, SchemaError> {
        let image_input = self
            .resolve_image_input(inputs)
            .ok_or_else(|| SchemaError::UnresolvedInputs(sorted_names(inputs)))?
            .clone();
        let disparity_input = self.resolve_disparity_input(inputs).cloned();

        let (bound, path) = match self.resolve_canonical(outputs) {
            Some(bound) => (bound, ResolutionPath::Canonical),
            None => (self.resolve_heuristic(outputs)?, ResolutionPath::Heuristic),
        };
        let [rotations, positions, scales, colors, opacities] = bound;

        info!(
            "Resolved model schema ({:?}): image={}, disparity={:?}",
            path,
            image_input.name,
            disparity_input.as_ref().map(|d| d.name.as_str())
        );
        debug!(
            "Outputs: positions={}, scales={}, rotations={}, colors={}, opacities={}",
            positions.name, scales.name, rotations.name, colors.name, opacities.name
        );

        Ok(SemanticSchema {
            image_input,
            disparity_input,
            positions,
            scales,
            rotations,
            colors,
            opacities,
            path,
        })
    }

    fn resolve_image_input<'a>(&self, inputs: &'a [FeatureDescriptor]) -> Option<&'a FeatureDescriptor> {
        let is_image_like =
            |d: &&FeatureDescriptor| matches!(d.kind, FeatureKind::Image { .. } | FeatureKind::MultiArray);

        inputs
            .iter()
            .filter(is_image_like)
            .find(|d| d.name == IMAGE_INPUT)
            .or_else(|| inputs.iter().find(is_image_like))
    }

    fn resolve_disparity_input<'a>(
        &self,
        inputs: &'a [FeatureDescriptor],
    ) -> Option<&'a FeatureDescriptor> {
        inputs.iter().find(|d| d.name == DISPARITY_INPUT).or_else(|| {
            inputs.iter().find(|d| {
                matches!(
                    d.kind,
                    FeatureKind::Double | FeatureKind::Int64 | FeatureKind::MultiArray
                ) && d.name.to_lowercase().contains("disparity")
            })
        })
    }

    /// Bind by canonical names, in [`OutputRole::ALL`] order.
    fn resolve_canonical(&self, outputs: &[FeatureDescriptor]) -> Option<[FeatureDescriptor; 5]> {
        let find = |role: OutputRole| {
            outputs
                .iter()
                .find(|d| d.name == role.canonical_name())
                .cloned()
        };

        Some([
            find(OutputRole::ALL[0])?,
            find(OutputRole::ALL[1])?,
            find(OutputRole::ALL[2])?,
            find(OutputRole::ALL[3])?,
            find(OutputRole::ALL[4])?,
        ])
    }

    /// Bind by rule table, in [`OutputRole::ALL`] order.
    fn resolve_heuristic(
        &self,
        outputs: &[FeatureDescriptor],
    ) -> Result<[FeatureDescriptor; 5], SchemaError> {
        let candidates: Vec<&FeatureDescriptor> = outputs
            .iter()
            .filter(|d| d.kind == FeatureKind::MultiArray && d.shape.is_some())
            .collect();

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut bound: [Option<&FeatureDescriptor>; 5] = [None; 5];

        for (slot, role) in bound.iter_mut().zip(OutputRole::ALL) {
            *slot = role
                .rules()
                .iter()
                .find_map(|rule| first_unclaimed(&candidates, &claimed, rule));
            if let Some(desc) = *slot {
                debug!("Heuristic bound {:?} to '{}'", role, desc.name);
                claimed.insert(desc.name.as_str());
            }
        }

        // Unhinted [1, N, 3] outputs fill the remaining vector roles in
        // declaration order.
        for (slot, role) in bound.iter_mut().zip(OutputRole::ALL) {
            let vector_role = matches!(
                role,
                OutputRole::Positions | OutputRole::Scales | OutputRole::Colors
            );
            if slot.is_some() || !vector_role {
                continue;
            }
            *slot = first_unclaimed(&candidates, &claimed, &UNNAMED_VEC3);
            if let Some(desc) = *slot {
                debug!("Positional fallback bound {:?} to '{}'", role, desc.name);
                claimed.insert(desc.name.as_str());
            }
        }

        match bound {
            [Some(r), Some(p), Some(s), Some(c), Some(o)] => {
                Ok([r.clone(), p.clone(), s.clone(), c.clone(), o.clone()])
            }
            _ => Err(SchemaError::UnresolvedOutputs(sorted_names(outputs))),
        }
    }
}

fn first_unclaimed<'a>(
    candidates: &[&'a FeatureDescriptor],
    claimed: &HashSet<&str>,
    rule: &Rule,
) -> Option<&'a FeatureDescriptor> {
    candidates
        .iter()
        .copied()
        .find(|d| !claimed.contains(d.name.as_str()) && rule.matches(d))
}

fn sorted_names(features: &[FeatureDescriptor]) -> Vec<String> {
    let mut names: Vec<String> = features.iter().map(|f| f.name.clone()).collect();
    names.sort();
    names
}

/// Spatial size `(width, height)` the image input expects, if declared.
///
/// Image features carry it directly; multi-arrays of rank 4 or more use the
/// last two dimensions. Dynamic dimensions yield `None`.
pub fn infer_input_size(desc: &FeatureDescriptor) -> Option<(u32, u32)> {
    if let FeatureKind::Image { width, height } = desc.kind {
        return (width > 0 && height > 0).then_some((width, height));
    }

    let shape = desc.shape.as_ref()?;
    if shape.len() < 4 {
        return None;
    }
    let width = u32::try_from(shape[shape.len() - 1]).ok()?;
    let height = u32::try_from(shape[shape.len() - 2]).ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

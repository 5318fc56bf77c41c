//! Named strata: interventions, behavior states, and demographic combos.
//!
//! A [`StrataLayout`] gives names to the indices of every tensor axis. It is
//! passed explicitly to builders instead of living in global tables.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::tensor::StrataShape;

/// Semantic category of an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    /// No treatment.
    Untreated,
    /// Active treatment (e.g. buprenorphine, methadone).
    Treatment,
    /// State after leaving a treatment. Nobody starts a simulation here.
    PostTreatment,
}

fn post_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^post[-_ ]").expect("static regex is valid"))
}

impl InterventionKind {
    /// Classifies an intervention from a legacy input name.
    ///
    /// Older inputs encode post-treatment states only through a `Post` prefix
    /// followed by a separator (`Post-Buprenorphine`, `post_naltrexone`).
    /// Names like `Postpartum Care` stay treatments. `No_Treatment` style
    /// names are untreated.
    #[must_use]
    pub fn from_legacy_name(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        if post_prefix().is_match(name) {
            Self::PostTreatment
        } else if lowered.starts_with("no_treatment") || lowered.starts_with("no treatment") {
            Self::Untreated
        } else {
            Self::Treatment
        }
    }
}

/// A named intervention with its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Intervention {
    /// Display name.
    pub name: String,
    /// Semantic category.
    pub kind: InterventionKind,
}

impl Intervention {
    /// Creates an intervention.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: InterventionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates an intervention, inferring its kind from the name.
    #[must_use]
    pub fn from_legacy_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = InterventionKind::from_legacy_name(&name);
        Self { name, kind }
    }
}

/// One demographic dimension (e.g. age group) and its categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DemographicDimension {
    /// Dimension name.
    pub name: String,
    /// Category names, in order.
    pub categories: Vec<String>,
}

impl DemographicDimension {
    /// Creates a demographic dimension.
    #[must_use]
    pub fn new(name: impl Into<String>, categories: Vec<String>) -> Self {
        Self {
            name: name.into(),
            categories,
        }
    }
}

/// Names for every index of the three tensor axes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrataLayout {
    /// Interventions, in axis order.
    pub interventions: Vec<Intervention>,
    /// Behavior states, in axis order.
    pub behaviors: Vec<String>,
    /// Demographic dimensions. The first one is the age dimension and varies
    /// slowest in the flattened combo axis.
    pub demographics: Vec<DemographicDimension>,
}

impl StrataLayout {
    /// Creates a layout.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if any axis would be empty.
    pub fn new(
        interventions: Vec<Intervention>,
        behaviors: Vec<String>,
        demographics: Vec<DemographicDimension>,
    ) -> Result<Self, ValidationError> {
        let layout = Self {
            interventions,
            behaviors,
            demographics,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Checks that every axis has at least one entry.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] describing the empty axis.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interventions.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "layout must name at least one intervention".to_string(),
            });
        }
        if self.behaviors.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "layout must name at least one behavior state".to_string(),
            });
        }
        if self.demographics.iter().any(|d| d.categories.is_empty()) {
            return Err(ValidationError::InvalidConfig {
                reason: "every demographic dimension needs at least one category".to_string(),
            });
        }
        Ok(())
    }

    /// Number of interventions.
    #[must_use]
    pub fn num_interventions(&self) -> usize {
        self.interventions.len()
    }

    /// Number of behavior states.
    #[must_use]
    pub fn num_behavior_states(&self) -> usize {
        self.behaviors.len()
    }

    /// Number of flattened demographic combos.
    #[must_use]
    pub fn num_demographic_combos(&self) -> usize {
        self.demographics.iter().map(|d| d.categories.len()).product()
    }

    /// Shape of a state tensor for this layout.
    #[must_use]
    pub fn shape(&self) -> StrataShape {
        StrataShape::new(
            self.num_interventions(),
            self.num_behavior_states(),
            self.num_demographic_combos(),
        )
    }

    /// Flattened demographic combos, first dimension varying slowest.
    #[must_use]
    pub fn demographic_combos(&self) -> Vec<Vec<String>> {
        let mut combos: Vec<Vec<String>> = vec![Vec::new()];
        for dim in &self.demographics {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    dim.categories.iter().map(move |cat| {
                        let mut next = prefix.clone();
                        next.push(cat.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }

    /// Demographic slots one age group spans: `combos / age groups`.
    ///
    /// Returns 0 when the layout has no demographic dimensions.
    #[must_use]
    pub fn age_group_shift(&self) -> usize {
        match self.demographics.first() {
            Some(age) if !age.categories.is_empty() => {
                self.num_demographic_combos() / age.categories.len()
            }
            _ => 0,
        }
    }

    /// Index of the intervention named `name`.
    #[must_use]
    pub fn intervention_index(&self, name: &str) -> Option<usize> {
        self.interventions.iter().position(|i| i.name == name)
    }

    /// Index of the behavior state named `name`.
    #[must_use]
    pub fn behavior_index(&self, name: &str) -> Option<usize> {
        self.behaviors.iter().position(|b| b == name)
    }

    /// Indices of all post-treatment interventions.
    #[must_use]
    pub fn post_treatment_indices(&self) -> Vec<usize> {
        self.interventions
            .iter()
            .enumerate()
            .filter(|(_, i)| i.kind == InterventionKind::PostTreatment)
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn layout() -> StrataLayout {
        StrataLayout::new(
            vec![
                Intervention::from_legacy_name("No_Treatment"),
                Intervention::from_legacy_name("Buprenorphine"),
                Intervention::from_legacy_name("Post-Buprenorphine"),
            ],
            strings(&["Active_Injection", "Nonactive_Noninjection"]),
            vec![
                DemographicDimension::new("age", strings(&["10_14", "15_19", "20_24"])),
                DemographicDimension::new("sex", strings(&["male", "female"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn legacy_names_classify() {
        use InterventionKind::{PostTreatment, Treatment, Untreated};
        assert_eq!(InterventionKind::from_legacy_name("Post-Methadone"), PostTreatment);
        assert_eq!(InterventionKind::from_legacy_name("post_naltrexone"), PostTreatment);
        assert_eq!(InterventionKind::from_legacy_name("POST Bup"), PostTreatment);
        assert_eq!(InterventionKind::from_legacy_name("No_Treatment"), Untreated);
        assert_eq!(InterventionKind::from_legacy_name("Methadone"), Treatment);
    }

    #[test]
    fn post_prefix_needs_a_separator() {
        assert_eq!(
            InterventionKind::from_legacy_name("Postpartum Care"),
            InterventionKind::Treatment
        );
        assert_eq!(InterventionKind::from_legacy_name("POSTBup"), InterventionKind::Treatment);
    }

    #[test]
    fn shape_follows_layout() {
        let l = layout();
        assert_eq!(l.shape(), StrataShape::new(3, 2, 6));
    }

    #[test]
    fn combos_vary_first_dimension_slowest() {
        let combos = layout().demographic_combos();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], strings(&["10_14", "male"]));
        assert_eq!(combos[1], strings(&["10_14", "female"]));
        assert_eq!(combos[2], strings(&["15_19", "male"]));
    }

    #[test]
    fn age_group_shift_spans_one_age_bracket() {
        assert_eq!(layout().age_group_shift(), 2);
    }

    #[test]
    fn lookups_by_name() {
        let l = layout();
        assert_eq!(l.intervention_index("Buprenorphine"), Some(1));
        assert_eq!(l.behavior_index("Nonactive_Noninjection"), Some(1));
        assert_eq!(l.behavior_index("missing"), None);
        assert_eq!(l.post_treatment_indices(), vec![2]);
    }

    #[test]
    fn empty_axes_are_rejected() {
        assert!(StrataLayout::new(Vec::new(), strings(&["a"]), Vec::new()).is_err());
        assert!(StrataLayout::new(
            vec![Intervention::new("x", InterventionKind::Untreated)],
            Vec::new(),
            Vec::new()
        )
        .is_err());
    }
}

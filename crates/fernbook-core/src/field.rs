use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A generated attribute of a plant record, or the virtual `profile` synthesis step.
///
/// Wire names match the record column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceField {
    Profile,
    CareLight,
    CareWater,
    CareTempHumidity,
    CareFertilizer,
    CarePruning,
    SoilDescription,
    PropagationMethods,
    Description,
    Availability,
    Rarity,
    DisplayName,
}

impl ForceField {
    pub const ALL: [ForceField; 12] = [
        ForceField::Profile,
        ForceField::CareLight,
        ForceField::CareWater,
        ForceField::CareTempHumidity,
        ForceField::CareFertilizer,
        ForceField::CarePruning,
        ForceField::SoilDescription,
        ForceField::PropagationMethods,
        ForceField::Description,
        ForceField::Availability,
        ForceField::Rarity,
        ForceField::DisplayName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ForceField::Profile => "profile",
            ForceField::CareLight => "care_light",
            ForceField::CareWater => "care_water",
            ForceField::CareTempHumidity => "care_temp_humidity",
            ForceField::CareFertilizer => "care_fertilizer",
            ForceField::CarePruning => "care_pruning",
            ForceField::SoilDescription => "soil_description",
            ForceField::PropagationMethods => "propagation_methods",
            ForceField::Description => "description",
            ForceField::Availability => "availability",
            ForceField::Rarity => "rarity",
            ForceField::DisplayName => "display_name",
        }
    }

    /// Virtual fields drive dependency propagation only and are never stored.
    pub fn is_virtual(self) -> bool {
        matches!(self, ForceField::Profile)
    }

    pub fn is_persisted(self) -> bool {
        !self.is_virtual()
    }

    pub fn group(self) -> FieldGroup {
        match self {
            ForceField::Profile => FieldGroup::Profile,
            ForceField::CareLight
            | ForceField::CareWater
            | ForceField::CareTempHumidity
            | ForceField::CareFertilizer
            | ForceField::CarePruning => FieldGroup::Care,
            ForceField::SoilDescription => FieldGroup::Soil,
            ForceField::PropagationMethods => FieldGroup::Propagation,
            ForceField::Description | ForceField::Availability | ForceField::Rarity => {
                FieldGroup::Overview
            }
            ForceField::DisplayName => FieldGroup::Naming,
        }
    }
}

impl fmt::Display for ForceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForceField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ForceField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| CoreError::UnknownField(s.to_string()))
    }
}

/// Fields that are regenerated together by a single structured-generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Profile,
    Care,
    Soil,
    Propagation,
    Overview,
    Naming,
}

impl FieldGroup {
    /// Declaration order. `Profile` comes first since every other group reads it.
    pub const ALL: [FieldGroup; 6] = [
        FieldGroup::Profile,
        FieldGroup::Care,
        FieldGroup::Soil,
        FieldGroup::Propagation,
        FieldGroup::Overview,
        FieldGroup::Naming,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldGroup::Profile => "profile",
            FieldGroup::Care => "care",
            FieldGroup::Soil => "soil",
            FieldGroup::Propagation => "propagation",
            FieldGroup::Overview => "overview",
            FieldGroup::Naming => "naming",
        }
    }

    pub fn fields(self) -> Vec<ForceField> {
        ForceField::ALL
            .iter()
            .copied()
            .filter(|f| f.group() == self)
            .collect()
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

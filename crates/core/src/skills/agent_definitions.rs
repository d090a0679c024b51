//! # Generator Roster
//!
//! Specialized generator roles, what each one owns, and the default
//! table that routes a finding's fix category to a role.

use serde::{Deserialize, Serialize};

use crate::models::FixCategory;

/// Specialization of one generator in a collaborative run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorRole {
    /// Layout, manifests, configuration, build files
    Foundation,
    /// Cross-module wiring and external service clients
    Integration,
    /// Service routes and request handling
    Endpoints,
    /// Everything else, and the fallback for unrouted findings
    General,
}

impl GeneratorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorRole::Foundation => "foundation",
            GeneratorRole::Integration => "integration",
            GeneratorRole::Endpoints => "endpoints",
            GeneratorRole::General => "general",
        }
    }

    pub fn all() -> [GeneratorRole; 4] {
        [
            GeneratorRole::Foundation,
            GeneratorRole::Integration,
            GeneratorRole::Endpoints,
            GeneratorRole::General,
        ]
    }
}

impl std::fmt::Display for GeneratorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role plus the fix categories it claims by default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: GeneratorRole,
    pub name: String,
    pub description: String,
    pub affinity: Vec<FixCategory>,
}

/// The Foundation generator
///
/// Runs first in round 1; every other phase builds on its output.
pub fn foundation_role() -> RoleDefinition {
    RoleDefinition {
        role: GeneratorRole::Foundation,
        name: "Foundation".into(),
        description: "Creates the project layout, dependency manifests, configuration \
                      and build files that the other generators build on."
            .into(),
        affinity: vec![
            FixCategory::Dependencies,
            FixCategory::Structure,
            FixCategory::Build,
        ],
    }
}

/// The Integration generator
pub fn integration_role() -> RoleDefinition {
    RoleDefinition {
        role: GeneratorRole::Integration,
        name: "Integration".into(),
        description: "Wires modules together and implements clients for external \
                      services the specification integrates with."
            .into(),
        affinity: vec![FixCategory::Imports],
    }
}

/// The Endpoints generator
pub fn endpoints_role() -> RoleDefinition {
    RoleDefinition {
        role: GeneratorRole::Endpoints,
        name: "Endpoints".into(),
        description: "Implements service routes, request validation and handlers.".into(),
        affinity: Vec::new(),
    }
}

/// The General generator
pub fn general_role() -> RoleDefinition {
    RoleDefinition {
        role: GeneratorRole::General,
        name: "General".into(),
        description: "Implements features end to end and repairs anything no \
                      specialist claims."
            .into(),
        affinity: vec![
            FixCategory::Syntax,
            FixCategory::Tests,
            FixCategory::Style,
            FixCategory::General,
        ],
    }
}

pub fn role_definition(role: GeneratorRole) -> RoleDefinition {
    match role {
        GeneratorRole::Foundation => foundation_role(),
        GeneratorRole::Integration => integration_role(),
        GeneratorRole::Endpoints => endpoints_role(),
        GeneratorRole::General => general_role(),
    }
}

/// Definitions for `roles`, in pipeline order. General is always present.
pub fn create_roster(roles: &[GeneratorRole]) -> Vec<RoleDefinition> {
    let mut roster: Vec<GeneratorRole> = roles.to_vec();
    if !roster.contains(&GeneratorRole::General) {
        roster.push(GeneratorRole::General);
    }
    roster.sort();
    roster.dedup();
    roster.into_iter().map(role_definition).collect()
}

/// Role that fixes a category when no override applies
pub fn default_affinity(category: FixCategory) -> GeneratorRole {
    GeneratorRole::all()
        .into_iter()
        .find(|role| role_definition(*role).affinity.contains(&category))
        .unwrap_or(GeneratorRole::General)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_affinity() {
        assert_eq!(default_affinity(FixCategory::Dependencies), GeneratorRole::Foundation);
        assert_eq!(default_affinity(FixCategory::Build), GeneratorRole::Foundation);
        assert_eq!(default_affinity(FixCategory::Imports), GeneratorRole::Integration);
        assert_eq!(default_affinity(FixCategory::Tests), GeneratorRole::General);
        assert_eq!(default_affinity(FixCategory::Syntax), GeneratorRole::General);
    }

    #[test]
    fn test_roster_always_has_general() {
        let roster = create_roster(&[GeneratorRole::Integration, GeneratorRole::Foundation]);
        let roles: Vec<_> = roster.iter().map(|d| d.role).collect();
        assert_eq!(
            roles,
            vec![
                GeneratorRole::Foundation,
                GeneratorRole::Integration,
                GeneratorRole::General
            ]
        );
    }

    #[test]
    fn test_every_category_routes_somewhere() {
        for category in [
            FixCategory::Syntax,
            FixCategory::Imports,
            FixCategory::Dependencies,
            FixCategory::Build,
            FixCategory::Structure,
            FixCategory::Tests,
            FixCategory::Style,
            FixCategory::General,
        ] {
            let role = default_affinity(category);
            assert!(role_definition(role).affinity.contains(&category));
        }
    }
}

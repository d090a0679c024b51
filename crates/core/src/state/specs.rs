//! # Specification
//!
//! Typed project specification consumed by the planner and handed to
//! generators. Parsed and validated once at the boundary so downstream
//! code reads fields instead of probing keys.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::SpecError;

/// Broad project type declared by the specification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Static,
    #[serde(alias = "landing-page", alias = "landing_page")]
    Landing,
    Frontend,
    Backend,
    Fullstack,
    Cli,
    Library,
    #[default]
    #[serde(other)]
    Other,
}

impl ProjectType {
    pub fn is_static(&self) -> bool {
        matches!(self, ProjectType::Static | ProjectType::Landing)
    }
}

/// A requested feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FeatureInput")]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureInput {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        description: String,
    },
}

impl From<FeatureInput> for Feature {
    fn from(input: FeatureInput) -> Self {
        match input {
            FeatureInput::Name(name) => Feature {
                name,
                description: String::new(),
            },
            FeatureInput::Full { name, description } => Feature { name, description },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechStack {
    pub frontend: Option<String>,
    pub backend: Option<String>,
    pub database: Option<String>,
    pub other: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployment {
    pub target: Option<String>,
    pub containerized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingRequirements {
    pub unit: bool,
    pub integration: bool,
    pub end_to_end: bool,
}

impl TestingRequirements {
    pub fn any(&self) -> bool {
        self.unit || self.integration || self.end_to_end
    }
}

/// The input document of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_type: ProjectType,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub tech_stack: TechStack,
    #[serde(default)]
    pub deployment: Deployment,
    #[serde(default)]
    pub testing: TestingRequirements,
    #[serde(default)]
    pub security: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
}

impl Specification {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            project_type: ProjectType::Other,
            features: Vec::new(),
            tech_stack: TechStack::default(),
            deployment: Deployment::default(),
            testing: TestingRequirements::default(),
            security: Vec::new(),
            integrations: Vec::new(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, SpecError> {
        let spec: Self =
            serde_json::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SpecError> {
        let spec: Self =
            serde_yaml::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load by extension: `.json`, `.yaml`/`.yml`, or `.toml`
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let content = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("toml") => {
                let spec: Self =
                    toml::from_str(&content).map_err(|e| SpecError::Parse(e.to_string()))?;
                spec.validate()?;
                Ok(spec)
            }
            _ => Self::from_json(&content),
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::Invalid("name must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for feature in &self.features {
            let key = feature.name.trim().to_lowercase();
            if key.is_empty() {
                return Err(SpecError::Invalid("feature with empty name".into()));
            }
            if !seen.insert(key) {
                return Err(SpecError::Invalid(format!(
                    "duplicate feature '{}'",
                    feature.name
                )));
            }
        }
        Ok(())
    }

    pub fn with_feature(mut self, name: &str, description: &str) -> Self {
        self.features.push(Feature {
            name: name.to_string(),
            description: description.to_string(),
        });
        self
    }

    /// Lowercased feature names and descriptions, for keyword matching
    pub fn feature_text(&self) -> String {
        self.features
            .iter()
            .map(|f| format!("{} {}", f.name, f.description))
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase()
    }

    pub fn has_backend(&self) -> bool {
        self.tech_stack.backend.is_some()
            || matches!(self.project_type, ProjectType::Backend | ProjectType::Fullstack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_with_mixed_features() {
        let spec = Specification::from_json(
            r#"{
                "name": "shop",
                "project_type": "fullstack",
                "features": ["catalog", {"name": "checkout", "description": "Stripe payments"}],
                "tech_stack": {"frontend": "react", "backend": "fastapi"}
            }"#,
        )
        .unwrap();
        assert_eq!(spec.project_type, ProjectType::Fullstack);
        assert_eq!(spec.features.len(), 2);
        assert_eq!(spec.features[1].description, "Stripe payments");
        assert!(spec.has_backend());
    }

    #[test]
    fn test_from_yaml() {
        let spec = Specification::from_yaml(
            "name: brochure\nproject_type: landing-page\nfeatures:\n  - hero section\n",
        )
        .unwrap();
        assert!(spec.project_type.is_static());
        assert_eq!(spec.features[0].name, "hero section");
    }

    #[test]
    fn test_unknown_project_type_is_other() {
        let spec = Specification::from_json(r#"{"name": "x", "project_type": "game"}"#).unwrap();
        assert_eq!(spec.project_type, ProjectType::Other);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let spec = Specification::new("x")
            .with_feature("Login", "")
            .with_feature("login", "again");
        assert!(matches!(spec.validate(), Err(SpecError::Invalid(_))));
        assert!(Specification::new("  ").validate().is_err());
    }
}

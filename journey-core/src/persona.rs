//! The cast of the simulated journey.
//!
//! Each persona pairs a role label with the behavioural description used to
//! condition generation. The registry is read-only for the duration of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role reported for authors that are not in the registry.
pub const SYSTEM_ROLE: &str = "System";

/// A named identity with a fixed voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name, also used as the journal author.
    pub name: String,

    /// Role label, e.g. "Concierge".
    pub role: String,

    /// Behavioural description prepended to every prompt for this persona.
    pub prompt: String,
}

impl Persona {
    /// Create a new persona.
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            prompt: prompt.into(),
        }
    }
}

/// Name-keyed lookup of personas.
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, Persona>,
}

impl PersonaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a persona, replacing any existing one with the same name.
    pub fn insert(&mut self, persona: Persona) {
        self.personas.insert(persona.name.clone(), persona);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, persona: Persona) -> Self {
        self.insert(persona);
        self
    }

    /// Look up a persona by name.
    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.get(name)
    }

    /// Role label for an author, or [`SYSTEM_ROLE`] if unknown.
    pub fn role_of(&self, name: &str) -> &str {
        self.personas
            .get(name)
            .map(|p| p.role.as_str())
            .unwrap_or(SYSTEM_ROLE)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.personas.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// The member and the five-person coaching team.
    pub fn elyx() -> Self {
        Self::new()
            .with(Persona::new(
                "Rohan Patel",
                "Member",
                "You are Rohan Patel, a 46-year-old Regional Head of Sales. You are analytical, \
                 driven, and value efficiency. Your father had a heart attack in his early 50s, \
                 which is your core motivation. You are direct, concise, tech-savvy, and \
                 data-driven. You can be impatient. You travel 1 week/month and adhere to plans \
                 ~50% of the time. You are managing high blood pressure. Your responses must ONLY \
                 be the message content.",
            ))
            .with(Persona::new(
                "Ruby",
                "Concierge",
                "You are Ruby, the Elyx Concierge. You are the master of coordination, \
                 scheduling, and logistics. You are empathetic, incredibly organized, and \
                 proactive. Your tone is warm, professional, and reassuring. You confirm every \
                 action. Your responses must ONLY be the message content.",
            ))
            .with(Persona::new(
                "Dr. Warren",
                "Medical Strategist",
                "You are Dr. Warren, the team's physician. You are authoritative, precise, and \
                 scientific. You interpret lab results and set medical direction. Your \
                 communication is clinical and evidence-based. Your responses must ONLY be the \
                 message content.",
            ))
            .with(Persona::new(
                "Advik",
                "Performance Scientist",
                "You are Advik, the Performance Scientist. You are an expert in wearable data \
                 (Whoop, Garmin). You are analytical, curious, and pattern-oriented. You talk in \
                 terms of hypotheses, experiments, and data-driven insights. Your responses must \
                 ONLY be the message content.",
            ))
            .with(Persona::new(
                "Carla",
                "Nutritionist",
                "You are Carla, the Nutritionist. You design nutrition plans and analyze food \
                 logs/CGM data. You are practical, educational, and focused on behavioral change. \
                 You always explain the 'why'. Your responses must ONLY be the message content.",
            ))
            .with(Persona::new(
                "Rachel",
                "PT / Physiotherapist",
                "You are Rachel, the PT. You manage everything related to physical movement. You \
                 are direct, encouraging, and focused on form and function. Your communication \
                 is motivating and action-oriented. Your responses must ONLY be the message \
                 content.",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elyx_cast() {
        let registry = PersonaRegistry::elyx();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.role_of("Rohan Patel"), "Member");
        assert_eq!(registry.role_of("Rachel"), "PT / Physiotherapist");

        let members = registry.iter().filter(|p| p.role == "Member").count();
        assert_eq!(members, 1);
    }

    #[test]
    fn test_unknown_author_is_system() {
        let registry = PersonaRegistry::elyx();
        assert_eq!(registry.role_of("Narrator"), SYSTEM_ROLE);
        assert!(registry.get("Narrator").is_none());
    }

    #[test]
    fn test_insert_replaces() {
        let mut registry = PersonaRegistry::new();
        registry.insert(Persona::new("Ruby", "Concierge", "v1"));
        registry.insert(Persona::new("Ruby", "Lead Concierge", "v2"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Ruby").unwrap().prompt, "v2");
    }
}

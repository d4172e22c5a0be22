//! The narrative as data.
//!
//! A [`Script`] is an ordered list of phases, each an ordered list of steps.
//! Decisions cite earlier generation steps by label; the driver maps labels
//! to the entry ids assigned at run time.

use crate::driver::SyntheticClock;
use crate::persona::PersonaRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Problems found by [`Script::validate`] or while loading a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Phase {phase}: unknown persona '{persona}'")]
    UnknownPersona { phase: usize, persona: String },

    #[error("Phase {phase}: decision '{title}' cites label '{label}' before it is defined")]
    UnknownLabel {
        phase: usize,
        title: String,
        label: String,
    },

    #[error("Phase {phase}: step for '{persona}' has {problem}")]
    InvalidTiming {
        phase: usize,
        persona: String,
        problem: String,
    },

    #[error("Label '{0}' is defined more than once")]
    DuplicateLabel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One persona speaking once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStep {
    pub persona: String,
    pub instruction: String,
    /// Upper bound of the hour jitter; values of 1 or less mean "up to 2".
    #[serde(default)]
    pub max_hours: f64,
    /// Whole days that pass before this message.
    #[serde(default)]
    pub days: i64,
    /// Name decisions use to cite this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl GenerationStep {
    pub fn new(persona: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            instruction: instruction.into(),
            max_hours: 0.0,
            days: 0,
            label: None,
        }
    }

    pub fn after_days(mut self, days: i64) -> Self {
        self.days = days;
        self
    }

    pub fn within_hours(mut self, hours: f64) -> Self {
        self.max_hours = hours;
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A structured protocol change, recorded without generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub author: String,
    pub title: String,
    pub details: String,
    /// Labels of earlier generation steps.
    #[serde(default)]
    pub references: Vec<String>,
}

impl DecisionStep {
    pub fn new(
        author: impl Into<String>,
        title: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
            details: details.into(),
            references: Vec::new(),
        }
    }

    pub fn citing<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references.extend(labels.into_iter().map(Into::into));
        self
    }
}

/// A single unit of narrative progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Generate(GenerationStep),
    Decide(DecisionStep),
}

impl From<GenerationStep> for Step {
    fn from(step: GenerationStep) -> Self {
        Step::Generate(step)
    }
}

impl From<DecisionStep> for Step {
    fn from(step: DecisionStep) -> Self {
        Step::Decide(step)
    }
}

/// A titled group of steps ("Month 3: ...").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub title: String,
    pub steps: Vec<Step>,
}

impl Phase {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn then(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }
}

/// The whole narrative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub phases: Vec<Phase>,
}

impl Script {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// Number of generation steps; the denominator of progress reports.
    pub fn generation_steps(&self) -> usize {
        self.steps()
            .filter(|s| matches!(s, Step::Generate(_)))
            .count()
    }

    /// Generation plus decision steps.
    pub fn total_steps(&self) -> usize {
        self.steps().count()
    }

    fn steps(&self) -> impl Iterator<Item = &Step> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    /// Check personas and label references without running anything.
    pub fn validate(&self, registry: &PersonaRegistry) -> Result<(), ScriptError> {
        let mut defined = HashSet::new();

        for (index, phase) in self.phases.iter().enumerate() {
            let phase_no = index + 1;
            for step in &phase.steps {
                match step {
                    Step::Generate(g) => {
                        if !registry.contains(&g.persona) {
                            return Err(ScriptError::UnknownPersona {
                                phase: phase_no,
                                persona: g.persona.clone(),
                            });
                        }
                        if let Some(problem) = timing_problem(g) {
                            return Err(ScriptError::InvalidTiming {
                                phase: phase_no,
                                persona: g.persona.clone(),
                                problem,
                            });
                        }
                        if let Some(label) = &g.label {
                            if !defined.insert(label.as_str()) {
                                return Err(ScriptError::DuplicateLabel(label.clone()));
                            }
                        }
                    }
                    Step::Decide(d) => {
                        if let Some(label) =
                            d.references.iter().find(|l| !defined.contains(l.as_str()))
                        {
                            return Err(ScriptError::UnknownLabel {
                                phase: phase_no,
                                title: d.title.clone(),
                                label: label.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a script from JSON. The result is not validated.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Eight months of a member's programme with the coaching team.
    pub fn elyx_journey() -> Self {
        const ROHAN: &str = "Rohan Patel";
        const RUBY: &str = "Ruby";
        const WARREN: &str = "Dr. Warren";
        const ADVIK: &str = "Advik";
        const CARLA: &str = "Carla";
        const RACHEL: &str = "Rachel";

        let say = GenerationStep::new;

        Self::new(vec![
            Phase::new("Month 1: Onboarding & Initial Concerns")
                .then(say(ROHAN, "Send your first message. Express your core concerns about your Garmin data and family history.").within_hours(1.0))
                .then(say(RUBY, "Provide an empathetic and organized response. Acknowledge his concern and tell him the immediate next step is getting Dr. Warren to review.").within_hours(1.0))
                .then(say(WARREN, "Reviewing the initial data, state the need for a full diagnostic panel to get a clear baseline.").after_days(1)),
            Phase::new("Month 2: First Diagnostic Results")
                .then(say(RUBY, "Inform Rohan that the results from his first diagnostic panel are in and Dr. Warren will share a summary.").after_days(25).labeled("results_ready"))
                .then(say(WARREN, "Share the key findings with specific numbers: His blood pressure is high at 145/95. His ApoB is elevated at 115 mg/dL, and his hs-CRP (inflammation marker) is 3.2 mg/L.").within_hours(2.0).labeled("first_panel"))
                .then(say(ROHAN, "Those numbers are concerning. What's the immediate plan to address this?").within_hours(1.0).labeled("asks_for_plan"))
                .then(DecisionStep::new(WARREN, "Initiate Hypertension & Lipid Protocol", "Prescribed Lisinopril 5mg for BP. Initiating nutrition plan with Carla to target ApoB and hs-CRP.")
                    .citing(["results_ready", "first_panel", "asks_for_plan"])),
            Phase::new("Month 3: Adherence, Travel & First Updates")
                .then(say(CARLA, "Hi Rohan, here is the initial nutrition plan. It's a Mediterranean-style diet to lower ApoB and inflammation.").after_days(10))
                .then(say(ROHAN, "This looks difficult to follow with my travel to London next week. I can't commit to this 100%. This is an example of the 50% adherence issue.").after_days(2))
                .then(say(CARLA, "Understood. Let's adapt. I'll create a 'Travel Appendix' with simple rules and go-to meal options you can find in any city, focusing on lean protein and fiber.").within_hours(3.0))
                .then(say(RACHEL, "Rohan, it's been two weeks. I'm updating your foundational workout plan to include some light dumbbell work now. The new plan is in your app.").after_days(1))
                .then(say(ADVIK, "Weekly Report: Great consistency this week, Rohan. You hit 3/3 planned workouts. Your resting heart rate is already trending down by an average of 2bpm.").after_days(4))
                .then(say(ROHAN, "Heads up, I'm traveling to London for 8 days starting next week.").after_days(3))
                .then(say(RACHEL, "Thanks for the heads up, Rohan. I'll create a hotel-gym friendly version of your workout plan. It will focus on bodyweight and dumbbell exercises.").within_hours(4.0)),
            Phase::new("Month 4: Second Diagnostic & Progress Check")
                .then(say(RUBY, "Hi Rohan, it's time for your 3-month follow-up diagnostic panel to check our progress.").after_days(25))
                .then(say(WARREN, "Rohan, the results are in. Excellent progress. Your blood pressure is down to 130/85, ApoB has improved to 98 mg/dL, and hs-CRP is down to 1.5 mg/L. The plan is working.").after_days(15).labeled("second_panel"))
                .then(DecisionStep::new(WARREN, "Continue Protocol & Introduce VO2 Max Testing", "Lifestyle changes and medication are effective. Continue current plan. Next, we will establish a VO2 Max baseline to optimize cardiovascular fitness.")
                    .citing(["second_panel"])),
            Phase::new("Month 5: VO2 Max & Fitness Focus")
                .then(say(RUBY, "Rohan, Advik would like you to do a VO2 Max test to get a baseline for your cardiovascular fitness. I can schedule it at a top sports lab.").after_days(10))
                .then(say(ROHAN, "Book it.").within_hours(1.0))
                .then(say(RACHEL, "It's been another two weeks. I'm updating your strength plan to increase the reps on your main lifts. We're building endurance now.").after_days(4))
                .then(say(ADVIK, "The VO2 Max results are in. Your score is 35 ml/kg/min, which is average for your age. Our goal for the next 6 months is to get this into the 'excellent' category, above 42. I'm updating your cardio plan to include targeted interval training.").after_days(7).labeled("vo2_results"))
                .then(DecisionStep::new(ADVIK, "Implement VO2 Max Improvement Plan", "Based on a VO2 Max score of 35, the cardio regimen will now include one weekly session of high-intensity interval training (HIIT) to drive improvement.")
                    .citing(["vo2_results"])),
            Phase::new("Month 6: CGM Implementation & Insights")
                .then(say(WARREN, "To further refine your nutrition plan for ApoB, I recommend a Continuous Glucose Monitor (CGM) for two weeks. It will give us invaluable data.").after_days(20))
                .then(say(ROHAN, "I'm interested. Let's do it.").within_hours(2.0))
                .then(say(ADVIK, "Weekly Report: Your first week with the CGM has been insightful. We've also seen your sleep consistency improve by 10% this week. Keep it up.").after_days(5))
                .then(say(ROHAN, "This CGM is fascinating. I had sushi for lunch and my glucose shot up to 180 mg/dL. I thought that was healthy.").after_days(10).labeled("sushi_spike"))
                .then(say(CARLA, "A very common finding! Let's run an experiment: next time, start the meal with edamame first to blunt the glucose spike. We'll compare the data.").within_hours(3.0).labeled("edamame_experiment"))
                .then(DecisionStep::new(CARLA, "Modify Meal Sequencing Based on CGM Data", "CGM data revealed a significant glucose spike after eating sushi. The new protocol is to preface carbohydrate-heavy meals with a fiber/protein source (like edamame) to manage glycemic response.")
                    .citing(["sushi_spike", "edamame_experiment"])),
            Phase::new("Month 7: Data-Driven Wearable Insights")
                .then(say(RACHEL, "Two weeks have passed. Time for a plan update. I'm swapping your dumbbell lunges for barbell squats to increase the load. Check the app for a form tutorial video.").after_days(10))
                .then(say(ADVIK, "Rohan, I was analyzing your wearable data. Your average HRV has increased from a baseline of 42ms to 55ms this month. This is a fantastic sign of improved resilience.").after_days(15))
                .then(say(ROHAN, "That's great to see quantified. I do feel less stressed overall.").within_hours(2.0)),
            Phase::new("Month 8: Long-Term Outlook")
                .then(say(ADVIK, "Final Weekly Report for this period: Your consistency with the new HIIT sessions has been 100%. This is directly contributing to the positive trend in your HRV. Excellent work.").after_days(20))
                .then(say(WARREN, "Rohan, as we close out these 8 months, your key biomarkers are all trending strongly in the right direction. Your blood pressure is well-managed, and your cardiovascular risk profile has significantly improved.").after_days(5))
                .then(say(ROHAN, "Excellent. I feel the difference. I'm ready to discuss the long-term longevity strategy.").within_hours(3.0))
                .then(say(RUBY, "That's wonderful to hear. I'm scheduling the comprehensive progress review to outline the strategy for the next year.").within_hours(1.0)),
        ])
    }
}

fn timing_problem(step: &GenerationStep) -> Option<String> {
    if step.days > SyntheticClock::MAX_STEP_DAYS {
        return Some(format!(
            "days = {} (limit {})",
            step.days,
            SyntheticClock::MAX_STEP_DAYS
        ));
    }
    if !step.max_hours.is_finite() || step.max_hours > SyntheticClock::MAX_JITTER_HOURS {
        return Some(format!(
            "max_hours = {} (limit {})",
            step.max_hours,
            SyntheticClock::MAX_JITTER_HOURS
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elyx_journey_shape() {
        let script = Script::elyx_journey();
        assert_eq!(script.phases.len(), 8);
        assert_eq!(script.generation_steps(), 31);
        assert_eq!(script.total_steps(), 35);
        assert!(script.validate(&PersonaRegistry::elyx()).is_ok());
    }

    #[test]
    fn test_validate_unknown_persona() {
        let script = Script::new(vec![
            Phase::new("One").then(GenerationStep::new("Nobody", "hi")),
        ]);
        let err = script.validate(&PersonaRegistry::elyx()).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownPersona { phase: 1, .. }));
    }

    #[test]
    fn test_validate_forward_reference() {
        let script = Script::new(vec![Phase::new("One")
            .then(DecisionStep::new("Carla", "Too early", "").citing(["later"]))
            .then(GenerationStep::new("Carla", "hi").labeled("later"))]);

        let err = script.validate(&PersonaRegistry::elyx()).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownLabel { label, .. } if label == "later"));
    }

    #[test]
    fn test_validate_duplicate_label() {
        let script = Script::new(vec![
            Phase::new("One").then(GenerationStep::new("Ruby", "a").labeled("x")),
            Phase::new("Two").then(GenerationStep::new("Ruby", "b").labeled("x")),
        ]);
        let err = script.validate(&PersonaRegistry::elyx()).unwrap_err();
        assert!(matches!(err, ScriptError::DuplicateLabel(l) if l == "x"));
    }

    #[test]
    fn test_validate_rejects_runaway_days() {
        let script = Script::new(vec![
            Phase::new("One").then(GenerationStep::new("Ruby", "hi").after_days(i64::MAX / 2)),
        ]);
        let err = script.validate(&PersonaRegistry::elyx()).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::InvalidTiming { phase: 1, ref persona, .. } if persona == "Ruby"
        ));
    }

    #[test]
    fn test_validate_rejects_runaway_jitter_from_json() {
        let script: Script = serde_json::from_str(
            r#"{"phases": [{"title": "One", "steps": [
                {"kind": "generate", "persona": "Ruby", "instruction": "hi", "max_hours": 1e300}
            ]}]}"#,
        )
        .unwrap();
        let err = script.validate(&PersonaRegistry::elyx()).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidTiming { .. }));
        assert!(err.to_string().contains("max_hours"));

        let nan = Script::new(vec![
            Phase::new("One").then(GenerationStep::new("Ruby", "hi").within_hours(f64::NAN)),
        ]);
        assert!(nan.validate(&PersonaRegistry::elyx()).is_err());
    }

    #[test]
    fn test_step_json_is_tagged() {
        let step: Step = GenerationStep::new("Ruby", "hello").after_days(2).into();
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["kind"], "generate");
        assert_eq!(json["days"], 2);
        assert!(json.get("label").is_none());

        let parsed: Step = serde_json::from_str(
            r#"{"kind": "decide", "author": "Advik", "title": "T", "details": "D"}"#,
        )
        .unwrap();
        assert!(matches!(parsed, Step::Decide(d) if d.references.is_empty()));
    }

    #[tokio::test]
    async fn test_script_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("script.json");

        let script = Script::elyx_journey();
        script.save_json(&path).await.unwrap();
        let loaded = Script::load_json(&path).await.unwrap();

        assert_eq!(loaded, script);
    }
}

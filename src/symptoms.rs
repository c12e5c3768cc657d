//! Rule-based general symptom matcher. Deterministic, no learned parameters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symptom {
    Fever,
    Cough,
    Headache,
    Sneeze,
    RunnyNose,
    MusclePain,
    JointPain,
    Nausea,
    Chills,
    Rash,
    Fatigue,
    SoreThroat,
}

/// Reported symptoms; anything not sent is treated as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SymptomFlags {
    pub fever: bool,
    pub cough: bool,
    pub headache: bool,
    pub sneeze: bool,
    pub runny_nose: bool,
    pub muscle_pain: bool,
    pub joint_pain: bool,
    pub nausea: bool,
    pub chills: bool,
    pub rash: bool,
    pub fatigue: bool,
    pub sore_throat: bool,
}

impl SymptomFlags {
    pub fn has(&self, s: Symptom) -> bool {
        match s {
            Symptom::Fever => self.fever,
            Symptom::Cough => self.cough,
            Symptom::Headache => self.headache,
            Symptom::Sneeze => self.sneeze,
            Symptom::RunnyNose => self.runny_nose,
            Symptom::MusclePain => self.muscle_pain,
            Symptom::JointPain => self.joint_pain,
            Symptom::Nausea => self.nausea,
            Symptom::Chills => self.chills,
            Symptom::Rash => self.rash,
            Symptom::Fatigue => self.fatigue,
            Symptom::SoreThroat => self.sore_throat,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SymptomRule {
    pub condition: &'static str,
    pub probability: f64,
    pub advice: &'static str,
    pub requires: &'static [Symptom],
    pub excludes: &'static [Symptom],
}

impl SymptomRule {
    pub fn matches(&self, flags: &SymptomFlags) -> bool {
        self.requires.iter().all(|s| flags.has(*s)) && !self.excludes.iter().any(|s| flags.has(*s))
    }
}

use Symptom::*;

/// Declaration order is significant: it breaks ties between equal weights.
pub const RULES: &[SymptomRule] = &[
    SymptomRule {
        condition: "Common Cold",
        probability: 0.85,
        advice: "Rest, hydration, and over-the-counter cold meds.",
        requires: &[Sneeze, RunnyNose, Cough],
        excludes: &[],
    },
    SymptomRule {
        condition: "Flu (Influenza)",
        probability: 0.90,
        advice: "Antiviral drugs, rest, fluids. See a doctor if severe.",
        requires: &[Fever, Cough, MusclePain, Fatigue],
        excludes: &[],
    },
    SymptomRule {
        condition: "Migraine",
        probability: 0.80,
        advice: "Rest in a dark room, pain relievers, hydration.",
        requires: &[Headache, Nausea],
        excludes: &[Fever],
    },
    SymptomRule {
        condition: "Malaria",
        probability: 0.75,
        advice: "Immediate blood test and medical attention required.",
        requires: &[Fever, Chills, Headache],
        excludes: &[],
    },
    SymptomRule {
        condition: "Dengue",
        probability: 0.85,
        advice: "Hydration, pain relief (avoid aspirin), monitor platelets.",
        requires: &[Fever, JointPain, Rash, Headache],
        excludes: &[],
    },
    SymptomRule {
        condition: "COVID-19",
        probability: 0.70,
        advice: "Isolate, get tested, monitor oxygen levels.",
        requires: &[Fever, Cough, Fatigue, SoreThroat],
        excludes: &[],
    },
];

pub const UNCERTAIN: &str = "Uncertain";
pub const UNCERTAIN_DETAILS: &str =
    "Symptoms do not match a specific pattern clearly. Please consult a doctor.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionMatch {
    #[serde(rename = "disease")]
    pub condition: &'static str,
    pub probability: f64,
    pub advice: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub prediction: &'static str,
    pub details: &'static str,
    pub matches: Vec<ConditionMatch>,
}

impl MatchOutcome {
    pub fn is_uncertain(&self) -> bool {
        self.matches.is_empty()
    }
}

pub fn match_symptoms(flags: &SymptomFlags) -> MatchOutcome {
    match_with_rules(RULES, flags)
}

/// Every matching rule, strongest first. Equal weights keep declaration
/// order: the earlier rule wins.
pub fn match_with_rules(rules: &[SymptomRule], flags: &SymptomFlags) -> MatchOutcome {
    let mut hits: Vec<(usize, &SymptomRule)> =
        rules.iter().enumerate().filter(|(_, r)| r.matches(flags)).collect();
    hits.sort_by(|(ia, a), (ib, b)| {
        b.probability
            .total_cmp(&a.probability)
            .then_with(|| ia.cmp(ib))
    });

    let matches: Vec<ConditionMatch> = hits
        .into_iter()
        .map(|(_, r)| ConditionMatch {
            condition: r.condition,
            probability: r.probability,
            advice: r.advice,
        })
        .collect();

    match matches.first() {
        Some(top) => MatchOutcome {
            prediction: top.condition,
            details: top.advice,
            matches,
        },
        None => MatchOutcome {
            prediction: UNCERTAIN,
            details: UNCERTAIN_DETAILS,
            matches,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flu_pattern_is_primary() {
        let flags = SymptomFlags {
            fever: true,
            cough: true,
            muscle_pain: true,
            fatigue: true,
            ..Default::default()
        };
        let out = match_symptoms(&flags);
        assert_eq!(out.prediction, "Flu (Influenza)");
        assert_eq!(out.matches[0].probability, 0.90);
        assert_eq!(out.matches.len(), 1);
    }

    #[test]
    fn no_flags_is_uncertain() {
        let out = match_symptoms(&SymptomFlags::default());
        assert_eq!(out.prediction, UNCERTAIN);
        assert_eq!(out.details, UNCERTAIN_DETAILS);
        assert!(out.is_uncertain());
    }

    #[test]
    fn equal_weights_keep_declaration_order() {
        // Common Cold and Dengue both weigh 0.85; Common Cold is declared first.
        let flags = SymptomFlags {
            sneeze: true,
            runny_nose: true,
            cough: true,
            fever: true,
            joint_pain: true,
            rash: true,
            headache: true,
            ..Default::default()
        };
        let out = match_symptoms(&flags);
        let names: Vec<_> = out.matches.iter().map(|m| m.condition).collect();
        assert_eq!(names, vec!["Common Cold", "Dengue"]);

        let reversed: Vec<SymptomRule> = vec![RULES[4], RULES[0]];
        let out = match_with_rules(&reversed, &flags);
        assert_eq!(out.prediction, "Dengue");
    }

    #[test]
    fn excluded_flag_blocks_rule() {
        let mut flags = SymptomFlags {
            headache: true,
            nausea: true,
            ..Default::default()
        };
        assert_eq!(match_symptoms(&flags).prediction, "Migraine");
        flags.fever = true;
        assert!(match_symptoms(&flags).is_uncertain());
    }

    #[test]
    fn all_matches_sorted_by_weight() {
        let flags = SymptomFlags {
            fever: true,
            cough: true,
            fatigue: true,
            sore_throat: true,
            chills: true,
            headache: true,
            muscle_pain: true,
            ..Default::default()
        };
        let out = match_symptoms(&flags);
        let names: Vec<_> = out.matches.iter().map(|m| m.condition).collect();
        assert_eq!(names, vec!["Flu (Influenza)", "Malaria", "COVID-19"]);
    }

    #[test]
    fn flags_deserialize_with_defaults() {
        let f: SymptomFlags = serde_json::from_str(r#"{"fever": true}"#).unwrap();
        assert!(f.fever && !f.cough);
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Vitals {
    pub heart_rate: i64,
    pub systolic_bp: i64,
    pub diastolic_bp: i64,
    pub steps_count: i64,
    /// Litres per day.
    pub hydration: f64,
    pub sleep_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthInsights {
    pub health_score: i32,
    pub precautions: Vec<&'static str>,
}

const BASE_SCORE: i32 = 100;

/// Starts from 100 and deducts per out-of-range vital, collecting one
/// precaution per deduction.
pub fn score(v: &Vitals) -> HealthInsights {
    let checks: [(bool, i32, &'static str); 5] = [
        (
            v.heart_rate > 100 || v.heart_rate < 60,
            10,
            "Abnormal heart rate detected. Consult a doctor.",
        ),
        (
            v.systolic_bp > 130 || v.diastolic_bp > 85,
            15,
            "High blood pressure. Reduce salt intake and monitor BP.",
        ),
        (v.steps_count < 5000, 10, "Low physical activity. Try to walk more."),
        (v.hydration < 2.0, 5, "Low hydration. Drink more water."),
        (v.sleep_hours < 7.0, 10, "Insufficient sleep. Aim for 7-8 hours."),
    ];

    let mut health_score = BASE_SCORE;
    let mut precautions = Vec::new();
    for (flagged, penalty, text) in checks {
        if flagged {
            health_score -= penalty;
            precautions.push(text);
        }
    }
    HealthInsights {
        health_score,
        precautions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> Vitals {
        Vitals {
            heart_rate: 72,
            systolic_bp: 118,
            diastolic_bp: 76,
            steps_count: 8000,
            hydration: 2.5,
            sleep_hours: 7.5,
        }
    }

    #[test]
    fn healthy_vitals_score_full() {
        let out = score(&healthy());
        assert_eq!(out.health_score, 100);
        assert!(out.precautions.is_empty());
    }

    #[test]
    fn every_deduction_applies() {
        let v = Vitals {
            heart_rate: 55,
            systolic_bp: 120,
            diastolic_bp: 90,
            steps_count: 1200,
            hydration: 1.0,
            sleep_hours: 5.0,
        };
        let out = score(&v);
        assert_eq!(out.health_score, 50);
        assert_eq!(out.precautions.len(), 5);
        assert_eq!(out.precautions[1], "High blood pressure. Reduce salt intake and monitor BP.");
    }

    #[test]
    fn boundaries_are_inclusive_of_normal() {
        let v = Vitals {
            heart_rate: 100,
            systolic_bp: 130,
            diastolic_bp: 85,
            steps_count: 5000,
            hydration: 2.0,
            sleep_hours: 7.0,
        };
        assert_eq!(score(&v).health_score, 100);
        let v = Vitals { heart_rate: 60, ..v };
        assert_eq!(score(&v).health_score, 100);
    }
}

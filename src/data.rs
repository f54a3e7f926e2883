use serde::{Deserialize, Serialize};

use crate::error::{AbcErr, AbcResult};

/// Treatment arm a series was recorded under.
///
/// Carried for loaders and reports only, the simulation never looks at it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Therapy {
    /// Procarbazine, lomustine and vincristine combination chemotherapy
    Pcv,
    /// Temozolomide
    Tmz,
    /// Radiotherapy
    Rt,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub time: f64,
    /// Tumour volume, same unit as the model's total burden.
    pub value: f64,
}

/// One patient's tumour volume series, strictly ascending in time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawDataset")]
pub struct ObservedDataset {
    label: String,
    therapy: Option<Therapy>,
    points: Vec<Observation>,
}

#[derive(Deserialize)]
struct RawDataset {
    label: String,
    therapy: Option<Therapy>,
    points: Vec<Observation>,
}
impl TryFrom<RawDataset> for ObservedDataset {
    type Error = AbcErr;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        let pairs = raw.points.into_iter().map(|o| (o.time, o.value));
        ObservedDataset::new(raw.label, raw.therapy, pairs)
    }
}

impl ObservedDataset {
    /// Sorts by time and keeps the first measurement seen for any repeated time.
    pub fn new<I>(label: impl Into<String>, therapy: Option<Therapy>, pairs: I) -> AbcResult<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let label = label.into();
        let mut points: Vec<Observation> = pairs
            .into_iter()
            .map(|(time, value)| Observation { time, value })
            .collect();

        if let Some(bad) = points
            .iter()
            .find(|o| !o.time.is_finite() || !o.value.is_finite() || o.value < 0.0)
        {
            return Err(AbcErr::ConfigurationError(format!(
                "Dataset {} has an invalid observation {:?}",
                label, bad
            )));
        }
        if points.is_empty() {
            return Err(AbcErr::ConfigurationError(format!(
                "Dataset {} has no observations",
                label
            )));
        }

        // Stable sort, so the first of any duplicated time survives
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        let before = points.len();
        points.dedup_by(|later, earlier| later.time == earlier.time);
        if points.len() < before {
            log::warn!(
                "Dropped {} duplicated time point(s) from dataset {}",
                before - points.len(),
                label
            );
        }

        Ok(Self {
            label,
            therapy,
            points,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn therapy(&self) -> Option<Therapy> {
        self.therapy
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|o| o.time).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_deduplicated() {
        let data = ObservedDataset::new(
            "PCV1-a",
            Some(Therapy::Pcv),
            vec![(3.0, 30.0), (1.0, 10.0), (3.0, 99.0), (2.0, 20.0)],
        )
        .unwrap();

        assert_eq!(vec![1.0, 2.0, 3.0], data.times());
        assert_eq!(30.0, data.points()[2].value);
        assert_eq!(Some(Therapy::Pcv), data.therapy());
    }

    #[test]
    fn reject_invalid_values() {
        let cases = [
            vec![(0.0, f64::NAN)],
            vec![(f64::INFINITY, 1.0)],
            vec![(0.0, -1.0)],
            vec![],
        ];
        for pairs in cases {
            match ObservedDataset::new("bad", None, pairs) {
                Err(AbcErr::ConfigurationError(_)) => (),
                other => panic!("Expected configuration error, got {:?}", other),
            }
        }
    }

    #[test]
    fn deserialise_validates() {
        let json = r#"{
            "label": "RT2-c",
            "therapy": "Rt",
            "points": [{"time": 2.0, "value": 5.0}, {"time": -1.0, "value": 4.0}]
        }"#;
        let data: ObservedDataset = serde_json::from_str(json).unwrap();
        assert_eq!(vec![-1.0, 2.0], data.times());

        let negative =
            r#"{"label": "x", "therapy": null, "points": [{"time": 0.0, "value": -2.0}]}"#;
        assert!(serde_json::from_str::<ObservedDataset>(negative).is_err());
    }
}
